use crate::error::SvnError;
use crate::listing::RepositoryEntry;
use crate::transfer::{BatchReport, TaskId, TransferCoordinator, TransferEvent, TransferKind};
use bytes::Bytes;
use futures_util::future::join_all;
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

// Chunks in flight between the backend process and the file writer.
const CHUNK_QUEUE: usize = 8;

impl TransferCoordinator {
    /// Streams one remote file into `destination`, reporting progress against `size`.
    /// A failed or cancelled download closes and leaves the partial file behind;
    /// callers must not trust it.
    pub async fn download_file(
        &self,
        url: &str,
        size: Option<u64>,
        destination: &Path,
    ) -> Result<PathBuf, SvnError> {
        let id = self.register(
            TransferKind::Download,
            url,
            destination.to_string_lossy(),
            size,
        );
        let cancel = self.cancellable(id);

        self.run_task(id, async {
            info!("starting download: {url} -> {}", destination.display());
            let mut file = File::create(destination).await?;
            let (tx, mut rx) = mpsc::channel::<Bytes>(CHUNK_QUEUE);

            let stream = self.repo.cat_streaming(url, tx, cancel);
            // owns the receiver so a failed write stops the sender instead of stalling it
            let write = async move {
                let mut transferred: u64 = 0;
                while let Some(chunk) = rx.recv().await {
                    file.write_all(&chunk).await?;
                    transferred += chunk.len() as u64;
                    self.progress(id, transferred);
                }
                file.flush().await?;
                Ok::<u64, SvnError>(transferred)
            };

            let (streamed, written) = tokio::join!(stream, write);
            let transferred = match (streamed, written) {
                (_, Err(err)) => return Err(err),
                (Err(err), _) => return Err(err),
                (Ok(_), Ok(transferred)) => transferred,
            };

            self.settle_progress(id);
            info!("download complete: {url}, {transferred} bytes");
            Ok(destination.to_path_buf())
        })
        .await
    }

    /// Exports a remote directory tree into `destination_dir/<name>` in one buffered
    /// invocation. No incremental progress is available for this path.
    pub async fn download_dir(
        &self,
        url: &str,
        name: &str,
        destination_dir: &Path,
    ) -> Result<PathBuf, SvnError> {
        let destination = destination_dir.join(name);
        let id = self.register(
            TransferKind::Download,
            url,
            destination.to_string_lossy(),
            None,
        );

        self.run_task(id, async {
            info!("exporting {url} -> {}", destination.display());
            self.repo.export(url, &destination).await?;
            Ok(destination.clone())
        })
        .await
    }

    /// Downloads a listing entry into `destination_dir`, by stream for files and by
    /// export for directories.
    pub async fn download_entry(
        &self,
        entry: &RepositoryEntry,
        destination_dir: &Path,
    ) -> Result<PathBuf, SvnError> {
        if entry.is_dir() {
            self.download_dir(&entry.full_path, &entry.name, destination_dir)
                .await
        } else {
            let destination = destination_dir.join(&entry.name);
            self.download_file(&entry.full_path, Some(entry.size_bytes), &destination)
                .await
        }
    }

    /// Starts every download at once and waits for all of them.
    pub async fn download_batch(
        &self,
        entries: &[RepositoryEntry],
        destination_dir: &Path,
    ) -> BatchReport {
        info!("starting {} downloads into {}", entries.len(), destination_dir.display());

        let results = join_all(
            entries
                .iter()
                .map(|entry| self.download_entry(entry, destination_dir)),
        )
        .await;

        let mut report = BatchReport::default();
        for (entry, result) in entries.iter().zip(results) {
            report.record(entry.full_path.clone(), result);
        }
        debug!(
            "batch download finished: {}/{} succeeded",
            report.succeeded,
            report.total()
        );
        report
    }

    /// The last chunk may land short of the advertised size; a successful download
    /// always ends on 100%.
    fn settle_progress(&self, id: TaskId) {
        let event = match self.tasks.get(&id) {
            Some(task) if task.total_bytes.is_some() && task.percent() != Some(100) => {
                TransferEvent::Progress {
                    id,
                    percent: Some(100),
                    transferred: task.transferred_bytes,
                }
            }
            _ => return,
        };
        self.emit(event);
    }
}
