use crate::error::SvnError;
use crate::transfer::{TransferCoordinator, TransferKind};
use log::info;

impl TransferCoordinator {
    pub async fn delete(&self, url: &str, message: &str) -> Result<(), SvnError> {
        let id = self.register(TransferKind::Delete, "", url, None);
        let _guard = self.lock_path(url).await;

        self.run_task(id, async {
            self.repo.delete(url, message).await?;
            info!("deleted {url}");
            Ok(())
        })
        .await
    }

    pub async fn mkdir(&self, url: &str, message: &str) -> Result<(), SvnError> {
        let id = self.register(TransferKind::Mkdir, "", url, None);
        let _guard = self.lock_path(url).await;

        self.run_task(id, async {
            self.repo.mkdir(url, message).await?;
            info!("created directory {url}");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::command::Verb;
    use crate::test_utils::{ROOT, ScriptedRunner, failure, repository};
    use crate::transfer::{TransferCoordinator, TransferKind, TransferState};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_delete_and_mkdir_attach_messages() {
        let runner = ScriptedRunner::new();
        let coordinator = TransferCoordinator::new(repository(runner.clone()), std::env::temp_dir());

        coordinator
            .delete(&format!("{ROOT}/old.txt"), "Deleted via SVNC")
            .await
            .unwrap();
        coordinator
            .mkdir(&format!("{ROOT}/docs"), "Created folder via SVNC")
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0].verb, Verb::Delete);
        assert_eq!(calls[0].message.as_deref(), Some("Deleted via SVNC"));
        assert_eq!(calls[1].verb, Verb::Mkdir);
        assert_eq!(calls[1].targets, vec![format!("{ROOT}/docs")]);

        let kinds: Vec<TransferKind> = coordinator.tasks().iter().map(|t| t.kind).collect();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&TransferKind::Delete));
        assert!(kinds.contains(&TransferKind::Mkdir));
    }

    #[tokio::test]
    async fn test_mkdir_failure_is_reported() {
        let runner = ScriptedRunner::new();
        runner.on(Verb::Mkdir, |_| Err(failure(1, "svn: E160020: Path already exists")));
        let coordinator = TransferCoordinator::new(repository(runner), std::env::temp_dir());

        assert!(coordinator.mkdir(&format!("{ROOT}/docs"), "m").await.is_err());
        assert!(matches!(
            coordinator.tasks()[0].state,
            TransferState::Failed { exit_code: Some(1), .. }
        ));
    }

    #[tokio::test]
    async fn test_mutations_on_same_path_are_serialized() {
        let coordinator = Arc::new(TransferCoordinator::new(
            repository(ScriptedRunner::new()),
            std::env::temp_dir(),
        ));
        let url = format!("{ROOT}/busy.txt");

        let guard = coordinator.lock_path(&url).await;
        let pending = {
            let coordinator = coordinator.clone();
            let url = url.clone();
            tokio::spawn(async move { coordinator.delete(&url, "m").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        drop(guard);
        pending.await.unwrap().unwrap();
        assert!(coordinator.path_locks.is_empty());
    }

    #[tokio::test]
    async fn test_path_locks_are_released_after_use() {
        let coordinator = TransferCoordinator::new(repository(ScriptedRunner::new()), std::env::temp_dir());

        for name in ["a.txt", "b.txt", "c"] {
            coordinator.delete(&format!("{ROOT}/{name}"), "m").await.unwrap();
        }
        coordinator.mkdir(&format!("{ROOT}/d"), "m").await.unwrap();
        assert!(coordinator.path_locks.is_empty());
    }
}
