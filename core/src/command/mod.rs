use crate::connection::Connection;
use crate::error::SvnError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

pub mod runner;

pub use runner::{RunnerConfig, SvnRunner};

pub const CHUNK_SIZE: usize = 64 * 1024; // 64KB chunks

/// Default cap for buffered output.
pub const DEFAULT_OUTPUT_LIMIT: usize = 10 * 1024 * 1024;

/// Every certificate failure category `svn` knows about. Accepting all of them lets
/// the client talk to self-signed and IP-addressed internal servers; this is a fixed
/// policy, not a setting.
pub const TRUST_SERVER_CERT_FAILURES: &str =
    "--trust-server-cert-failures=unknown-ca,cn-mismatch,expired,not-yet-valid,other";

/// Subcommands the client issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    List,
    Export,
    Cat,
    Import,
    Checkout,
    Update,
    Commit,
    Delete,
    Mkdir,
    Log,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::List => "list",
            Verb::Export => "export",
            Verb::Cat => "cat",
            Verb::Import => "import",
            Verb::Checkout => "checkout",
            Verb::Update => "update",
            Verb::Commit => "commit",
            Verb::Delete => "delete",
            Verb::Mkdir => "mkdir",
            Verb::Log => "log",
        }
    }

    fn structured_output(&self) -> bool {
        matches!(self, Verb::List | Verb::Log)
    }

    fn forced(&self) -> bool {
        matches!(self, Verb::Export | Verb::Import)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Depth {
    Empty,
    Files,
    Immediates,
    Infinity,
}

impl Depth {
    fn as_str(&self) -> &'static str {
        match self {
            Depth::Empty => "empty",
            Depth::Files => "files",
            Depth::Immediates => "immediates",
            Depth::Infinity => "infinity",
        }
    }
}

/// One backend invocation: verb, targets and the per-call options.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub verb: Verb,
    pub targets: Vec<String>,
    pub revision: Option<u64>,
    pub message: Option<String>,
    pub depth: Option<Depth>,
    pub working_dir: Option<PathBuf>,
    pub output_limit: Option<usize>,
    pub connection: Option<Arc<Connection>>,
}

impl CommandSpec {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            targets: Vec::new(),
            revision: None,
            message: None,
            depth: None,
            working_dir: None,
            output_limit: None,
            connection: None,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn revision(mut self, revision: Option<u64>) -> Self {
        self.revision = revision;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn depth(mut self, depth: Depth) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn output_limit(mut self, limit: usize) -> Self {
        self.output_limit = Some(limit);
        self
    }

    pub fn connection(mut self, connection: Arc<Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Full argument vector, normalized: verb and its options, the fixed
    /// non-interactive and trust flags, credentials, then the targets after `--`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.verb.as_str().to_string()];

        if self.verb.structured_output() {
            args.push("--xml".to_string());
        }
        if self.verb.forced() {
            args.push("--force".to_string());
        }
        if let Some(depth) = self.depth {
            args.push("--depth".to_string());
            args.push(depth.as_str().to_string());
        }
        if let Some(revision) = self.revision {
            args.push("-r".to_string());
            args.push(revision.to_string());
        }
        if let Some(message) = &self.message {
            args.push("-m".to_string());
            args.push(message.clone());
        }

        args.push("--non-interactive".to_string());
        args.push(TRUST_SERVER_CERT_FAILURES.to_string());

        if let Some(connection) = &self.connection {
            args.extend(connection.auth_args());
        }

        // `--` keeps targets starting with `-` from being read as options
        args.push("--".to_string());
        args.extend(self.targets.iter().cloned());
        args
    }

    /// Argument vector safe for logging.
    pub fn redacted_args(&self) -> Vec<String> {
        let mut args = self.args();
        let mut mask_next = false;
        for arg in args.iter_mut() {
            if mask_next {
                *arg = "******".to_string();
                mask_next = false;
            } else if arg == "--password" {
                mask_next = true;
            }
        }
        args
    }
}

/// Captured result of a buffered invocation that exited successfully.
#[derive(Clone, Debug, Default)]
pub struct Output {
    pub stdout: Bytes,
    pub stderr: String,
}

impl Output {
    /// Stdout as UTF-8 text. The backend runs under a UTF-8 locale, so invalid bytes
    /// mean the output is not what we asked for.
    pub fn text(&self) -> Result<&str, SvnError> {
        std::str::from_utf8(&self.stdout).map_err(|err| {
            SvnError::parse(&String::from_utf8_lossy(&self.stdout), err.to_string())
        })
    }
}

/// Seam between the client and the process layer.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs to completion and captures stdout (raw bytes) and stderr.
    async fn run(&self, spec: &CommandSpec) -> Result<Output, SvnError>;

    /// Runs while forwarding stdout chunks into `chunks` as they arrive. The bounded
    /// channel is the only buffer between the process and the consumer. Resolves to
    /// the number of bytes forwarded once the process exits with status 0.
    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        chunks: Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<u64, SvnError>;
}
