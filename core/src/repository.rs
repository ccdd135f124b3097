use crate::command::{CommandRunner, CommandSpec, Depth, Verb};
use crate::connection::Connection;
use crate::error::SvnError;
use crate::listing::{self, LogEntry, RepositoryEntry};
use bytes::Bytes;
use log::debug;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// Cap for `cat` into memory (previews).
pub const PREVIEW_OUTPUT_LIMIT: usize = 20 * 1024 * 1024;

/// A connection bound to a runner. Every method is exactly one backend invocation.
pub struct Repository {
    runner: Arc<dyn CommandRunner>,
    connection: Arc<Connection>,
    preview_limit: usize,
}

impl Repository {
    pub fn new(runner: Arc<dyn CommandRunner>, connection: Connection) -> Self {
        Self {
            runner,
            connection: Arc::new(connection),
            preview_limit: PREVIEW_OUTPUT_LIMIT,
        }
    }

    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn root_url(&self) -> &str {
        &self.connection.repository_url
    }

    fn spec(&self, verb: Verb) -> CommandSpec {
        CommandSpec::new(verb).connection(self.connection.clone())
    }

    pub async fn list(&self, url: &str) -> Result<Vec<RepositoryEntry>, SvnError> {
        let output = self.runner.run(&self.spec(Verb::List).target(url)).await?;
        let entries = listing::parse_listing(output.text()?, url)?;
        debug!("listed {} entries under {url}", entries.len());
        Ok(entries)
    }

    pub async fn log(&self, url: &str) -> Result<Vec<LogEntry>, SvnError> {
        let output = self.runner.run(&self.spec(Verb::Log).target(url)).await?;
        listing::parse_history(output.text()?)
    }

    /// Raw file bytes, optionally at a historical revision.
    pub async fn cat(&self, url: &str, revision: Option<u64>) -> Result<Bytes, SvnError> {
        let spec = self
            .spec(Verb::Cat)
            .target(url)
            .revision(revision)
            .output_limit(self.preview_limit);
        Ok(self.runner.run(&spec).await?.stdout)
    }

    pub async fn cat_streaming(
        &self,
        url: &str,
        chunks: Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<u64, SvnError> {
        let spec = self.spec(Verb::Cat).target(url);
        self.runner.run_streaming(&spec, chunks, cancel).await
    }

    pub async fn export(&self, url: &str, destination: &Path) -> Result<(), SvnError> {
        let spec = self
            .spec(Verb::Export)
            .target(url)
            .target(destination.to_string_lossy());
        self.runner.run(&spec).await.map(|_| ())
    }

    pub async fn import(&self, local: &Path, url: &str, message: &str) -> Result<(), SvnError> {
        let spec = self
            .spec(Verb::Import)
            .message(message)
            .target(local.to_string_lossy())
            .target(url);
        self.runner.run(&spec).await.map(|_| ())
    }

    pub async fn checkout_empty(&self, url: &str, working_copy: &Path) -> Result<(), SvnError> {
        let spec = self
            .spec(Verb::Checkout)
            .depth(Depth::Empty)
            .target(url)
            .target(working_copy.to_string_lossy());
        self.runner.run(&spec).await.map(|_| ())
    }

    /// Brings a single entry of an empty-depth working copy in from the repository.
    pub async fn update_entry(&self, working_copy: &Path, name: &str) -> Result<(), SvnError> {
        let spec = self
            .spec(Verb::Update)
            .working_dir(working_copy)
            .target(name);
        self.runner.run(&spec).await.map(|_| ())
    }

    pub async fn commit_entry(
        &self,
        working_copy: &Path,
        name: &str,
        message: &str,
    ) -> Result<(), SvnError> {
        let spec = self
            .spec(Verb::Commit)
            .working_dir(working_copy)
            .message(message)
            .target(name);
        self.runner.run(&spec).await.map(|_| ())
    }

    pub async fn delete(&self, url: &str, message: &str) -> Result<(), SvnError> {
        let spec = self.spec(Verb::Delete).message(message).target(url);
        self.runner.run(&spec).await.map(|_| ())
    }

    pub async fn mkdir(&self, url: &str, message: &str) -> Result<(), SvnError> {
        let spec = self.spec(Verb::Mkdir).message(message).target(url);
        self.runner.run(&spec).await.map(|_| ())
    }
}
