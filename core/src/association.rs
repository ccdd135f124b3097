use crate::error::SvnError;
use crate::listing::RepositoryEntry;
use crate::transfer::TransferCoordinator;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How a file opens on activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Association {
    Internal,
    External,
}

impl std::str::FromStr for Association {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "internal" => Ok(Association::Internal),
            "external" => Ok(Association::External),
            _ => Err(format!("invalid association: {}", s)),
        }
    }
}

impl std::fmt::Display for Association {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Association::Internal => write!(f, "internal"),
            Association::External => write!(f, "external"),
        }
    }
}

/// Extension (lower-case, no dot) to handling mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssociationTable(BTreeMap<String, Association>);

impl Default for AssociationTable {
    fn default() -> Self {
        let internal = [
            "txt", "md", "js", "jsx", "json", "xml", "html", "css", "png", "jpg", "jpeg", "svg",
        ];
        Self(
            internal
                .into_iter()
                .map(|ext| (ext.to_string(), Association::Internal))
                .collect(),
        )
    }
}

impl AssociationTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, extension: &str) -> Option<Association> {
        self.0.get(&extension.to_lowercase()).copied()
    }

    /// Sets the mode for an extension given with or without its leading dot.
    /// Returns false when the extension is blank or the mode was already set.
    pub fn set(&mut self, extension: &str, mode: Association) -> bool {
        let extension = extension.trim().trim_start_matches('.').to_lowercase();
        if extension.is_empty() {
            return false;
        }
        self.0.insert(extension, mode) != Some(mode)
    }

    pub fn remove(&mut self, extension: &str) -> bool {
        let extension = extension.trim().trim_start_matches('.').to_lowercase();
        self.0.remove(&extension).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Association)> {
        self.0.iter().map(|(ext, mode)| (ext.as_str(), *mode))
    }
}

/// Text after the last `.`, lower-cased. A name without a dot is its own extension.
pub fn extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => file_name.to_lowercase(),
    }
}

/// Unmapped extensions open externally.
pub fn classify(file_name: &str, table: &AssociationTable) -> Association {
    table
        .get(&extension(file_name))
        .unwrap_or(Association::External)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Binary,
}

/// File content ready for display. Binary payloads are base64.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub content_type: ContentType,
    pub payload: String,
    pub revision: Option<u64>,
}

impl Preview {
    /// A null byte marks content as binary. Content that is not valid UTF-8 is
    /// treated as binary as well, so it is never mangled by lossy decoding.
    pub fn from_bytes(bytes: &[u8], revision: Option<u64>) -> Self {
        let text = if bytes.contains(&0) {
            None
        } else {
            std::str::from_utf8(bytes).ok()
        };

        match text {
            Some(text) => Preview {
                content_type: ContentType::Text,
                payload: text.to_string(),
                revision,
            },
            None => Preview {
                content_type: ContentType::Binary,
                payload: STANDARD.encode(bytes),
                revision,
            },
        }
    }

    /// Raw bytes back out of the payload.
    pub fn bytes(&self) -> Result<Vec<u8>, SvnError> {
        match self.content_type {
            ContentType::Text => Ok(self.payload.as_bytes().to_vec()),
            ContentType::Binary => STANDARD
                .decode(&self.payload)
                .map_err(|err| SvnError::parse(&self.payload, err.to_string())),
        }
    }
}

/// Fetches a file's content, at `revision` when given, for inline display.
pub async fn preview(
    coordinator: &TransferCoordinator,
    url: &str,
    revision: Option<u64>,
) -> Result<Preview, SvnError> {
    let bytes = coordinator.repository().cat(url, revision).await?;
    Ok(Preview::from_bytes(&bytes, revision))
}

/// Downloads a file into the scratch directory for the OS default application.
/// Opening it is the caller's job.
pub async fn hand_off(
    coordinator: &TransferCoordinator,
    entry: &RepositoryEntry,
) -> Result<PathBuf, SvnError> {
    let destination = coordinator.scratch_dir().join(&entry.name);
    coordinator
        .download_file(&entry.full_path, Some(entry.size_bytes), &destination)
        .await
}
