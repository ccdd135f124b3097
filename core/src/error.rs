use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

#[derive(Debug, Error)]
struct SvnMessageError(pub &'static str);

impl Display for SvnMessageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}", self.0)
    }
}

impl From<SvnMessageError> for SvnError {
    fn from(message: SvnMessageError) -> Self {
        SvnError::Other(Box::new(message))
    }
}

pub fn message_error<T>(msg: &'static str) -> Result<T, SvnError> {
    Err(SvnMessageError(msg).into())
}

#[derive(Debug, Error)]
pub enum SvnError {
    /// Non-zero exit or spawn failure. `code` is `None` when the process never ran
    /// or was terminated by a signal.
    #[error("svn command failed (exit code {}): {stderr}", display_code(.code))]
    Command { code: Option<i32>, stderr: String },

    #[error("credentials rejected by the repository: {stderr}")]
    CredentialRejected { stderr: String },

    #[error("malformed svn output ({reason}): {fragment}")]
    Parse { fragment: String, reason: String },

    #[error("svn output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    #[error("remote file does not exist: {url}")]
    TargetNotFound { url: String },

    #[error("not an expandable directory: {path}")]
    NotExpandable { path: String },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl SvnError {
    /// Exit code of the failed backend process, when there was one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SvnError::Command { code, .. } => *code,
            SvnError::CredentialRejected { .. } => Some(1),
            _ => None,
        }
    }

    pub(crate) fn parse(fragment: &str, reason: impl Into<String>) -> Self {
        const MAX_FRAGMENT: usize = 256;
        let fragment = match fragment.char_indices().nth(MAX_FRAGMENT) {
            Some((cut, _)) => format!("{}...", &fragment[..cut]),
            None => fragment.to_string(),
        };
        SvnError::Parse {
            fragment,
            reason: reason.into(),
        }
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}
