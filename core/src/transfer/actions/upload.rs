use crate::error::{SvnError, message_error};
use crate::path;
use crate::transfer::{TransferCoordinator, TransferKind};
use log::{debug, info, warn};
use std::path::Path;
use tokio::fs;

const SCRATCH_PREFIX: &str = "svnc-update-";

impl TransferCoordinator {
    /// Imports a local file as a new remote path. The backend refuses targets that
    /// already exist; existing names go through [`TransferCoordinator::update`].
    pub async fn upload(&self, local: &Path, url: &str, message: &str) -> Result<(), SvnError> {
        let size = local_size(local).await;
        let id = self.register(TransferKind::Upload, local.to_string_lossy(), url, size);
        let _guard = self.lock_path(url).await;

        self.run_task(id, async {
            info!("importing {} -> {url}", local.display());
            self.repo.import(local, url, message).await?;
            if let Some(size) = size {
                self.progress(id, size);
            }
            Ok(())
        })
        .await
    }

    /// Replaces the content of an existing remote file and commits it, keeping its
    /// history. Uses a private empty-depth working copy that is removed on every exit
    /// path, success or not. Never creates remote files.
    pub async fn update(&self, local: &Path, url: &str, message: &str) -> Result<(), SvnError> {
        let size = local_size(local).await;
        let id = self.register(TransferKind::Update, local.to_string_lossy(), url, size);
        let _guard = self.lock_path(url).await;

        self.run_task(id, async {
            self.replace_remote_file(local, url, message).await?;
            if let Some(size) = size {
                self.progress(id, size);
            }
            Ok(())
        })
        .await
    }

    async fn replace_remote_file(
        &self,
        local: &Path,
        url: &str,
        message: &str,
    ) -> Result<(), SvnError> {
        let Some(parent) = path::parent(url) else {
            return message_error("remote url has no parent directory");
        };
        let Some(name) = path::file_name(url) else {
            return message_error("remote url has no file name");
        };

        // dropped on every return below, which deletes the working copy
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.scratch_dir)?;
        let working_copy = scratch.path();
        debug!("updating {url} through {}", working_copy.display());

        self.repo.checkout_empty(&parent, working_copy).await?;

        match self.repo.update_entry(working_copy, name).await {
            Ok(()) => {}
            Err(SvnError::Command { stderr, .. }) => {
                warn!("cannot fetch {url} into working copy: {stderr}");
                return Err(SvnError::TargetNotFound {
                    url: url.to_string(),
                });
            }
            Err(err) => return Err(err),
        }

        // an empty-depth update of a missing name can succeed without fetching it
        let target = working_copy.join(name);
        if !fs::try_exists(&target).await? {
            return Err(SvnError::TargetNotFound {
                url: url.to_string(),
            });
        }

        fs::copy(local, &target).await?;
        self.repo.commit_entry(working_copy, name, message).await?;
        info!("committed new content of {url}");
        Ok(())
    }
}

async fn local_size(local: &Path) -> Option<u64> {
    fs::metadata(local).await.ok().map(|meta| meta.len())
}
