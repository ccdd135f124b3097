//! Typed records for `svn list --xml` and `svn log --xml` output.
//!
//! Parsing is pure. Optional commit metadata (author, date, revision) may be missing
//! and is substituted with empty values; anything structurally wrong is a
//! [`SvnError::Parse`] carrying the offending fragment.

use crate::error::SvnError;
use crate::path;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    #[serde(rename = "dir")]
    Directory,
}

impl EntryKind {
    fn from_attr(kind: &str) -> Option<Self> {
        match kind {
            "file" => Some(EntryKind::File),
            "dir" => Some(EntryKind::Directory),
            _ => None,
        }
    }
}

/// Snapshot of one listing row. Superseded, never mutated, by the next listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RepositoryEntry {
    pub kind: EntryKind,
    pub name: String,
    pub size_bytes: u64,
    pub last_commit_revision: Option<u64>,
    pub last_author: String,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub full_path: String,
}

impl RepositoryEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub revision: u64,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct XmlLists {
    #[serde(default)]
    list: Vec<XmlList>,
}

#[derive(Debug, Deserialize)]
struct XmlList {
    #[serde(default)]
    entry: Vec<XmlEntry>,
}

#[derive(Debug, Deserialize)]
struct XmlEntry {
    #[serde(rename = "@kind")]
    kind: String,
    size: Option<String>,
    commit: Option<XmlCommit>,
}

#[derive(Debug, Deserialize)]
struct XmlCommit {
    #[serde(rename = "@revision")]
    revision: Option<String>,
    author: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlLog {
    #[serde(default)]
    logentry: Vec<XmlLogEntry>,
}

#[derive(Debug, Deserialize)]
struct XmlLogEntry {
    #[serde(rename = "@revision")]
    revision: String,
    author: Option<String>,
    date: Option<String>,
    msg: Option<String>,
}

/// Parses `svn list --xml` output. `parent_path` is the listed URL; each entry's
/// `full_path` is `parent_path` followed by exactly one separator and the name.
pub fn parse_listing(raw: &str, parent_path: &str) -> Result<Vec<RepositoryEntry>, SvnError> {
    let lists: XmlLists =
        quick_xml::de::from_str(raw).map_err(|err| SvnError::parse(raw, err.to_string()))?;

    let names = entry_names(raw)?;
    let base = path::join(parent_path, "");
    let mut entries = Vec::new();

    let listed: Vec<XmlEntry> = lists.list.into_iter().flat_map(|list| list.entry).collect();
    if listed.len() != names.len() {
        return Err(SvnError::parse(raw, "entry count mismatch"));
    }

    for (entry, name) in listed.into_iter().zip(names) {
        let kind = EntryKind::from_attr(&entry.kind).ok_or_else(|| {
            SvnError::parse(
                &format!("<entry kind=\"{}\">", entry.kind),
                "unknown entry kind",
            )
        })?;

        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(SvnError::parse(raw, "entry without a name")),
        };

        let size_bytes = match entry.size.as_deref().map(str::trim) {
            None | Some("") => 0,
            Some(size) => size.parse().map_err(|_| {
                SvnError::parse(&format!("<size>{size}</size>"), "size is not a number")
            })?,
        };

        let (last_commit_revision, last_author, last_modified_at) = match entry.commit {
            Some(commit) => (
                parse_revision(commit.revision.as_deref())?,
                commit.author.unwrap_or_default(),
                parse_date(commit.date.as_deref())?,
            ),
            None => (None, String::new(), None),
        };

        entries.push(RepositoryEntry {
            kind,
            full_path: format!("{base}{name}"),
            name,
            size_bytes,
            last_commit_revision,
            last_author,
            last_modified_at,
        });
    }

    Ok(entries)
}

/// The `<name>` text of every `<entry>`, in document order and exactly as listed.
/// Subversion allows surrounding whitespace in names, which the serde reader trims.
fn entry_names(raw: &str) -> Result<Vec<Option<String>>, SvnError> {
    let mut reader = Reader::from_str(raw);
    let mut names: Vec<Option<String>> = Vec::new();
    let mut in_entry = false;
    let mut current: Option<String> = None;

    let malformed = |err: quick_xml::Error| SvnError::parse(raw, err.to_string());

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(tag) => match tag.local_name().as_ref() {
                b"entry" => {
                    in_entry = true;
                    names.push(None);
                }
                b"name" if in_entry => current = Some(String::new()),
                _ => {}
            },
            Event::Empty(tag) => match tag.local_name().as_ref() {
                b"entry" => names.push(None),
                b"name" if in_entry => {
                    if let Some(slot) = names.last_mut() {
                        *slot = Some(String::new());
                    }
                }
                _ => {}
            },
            Event::Text(text) => {
                if let Some(name) = current.as_mut() {
                    name.push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Event::End(tag) => match tag.local_name().as_ref() {
                b"entry" => in_entry = false,
                b"name" => {
                    if let (Some(name), Some(slot)) = (current.take(), names.last_mut()) {
                        *slot = Some(name);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(names)
}

/// Parses `svn log --xml` output, newest first as the backend reports it.
pub fn parse_history(raw: &str) -> Result<Vec<LogEntry>, SvnError> {
    let log: XmlLog =
        quick_xml::de::from_str(raw).map_err(|err| SvnError::parse(raw, err.to_string()))?;

    log.logentry
        .into_iter()
        .map(|entry| {
            let revision = parse_revision(Some(&entry.revision))?.ok_or_else(|| {
                SvnError::parse(&format!("<logentry revision=\"{}\">", entry.revision), "missing revision")
            })?;
            Ok(LogEntry {
                revision,
                author: entry.author.unwrap_or_default(),
                date: parse_date(entry.date.as_deref())?,
                message: entry.msg.unwrap_or_default(),
            })
        })
        .collect()
}

fn parse_revision(revision: Option<&str>) -> Result<Option<u64>, SvnError> {
    match revision.map(str::trim) {
        None | Some("") => Ok(None),
        Some(revision) => revision.parse().map(Some).map_err(|_| {
            SvnError::parse(&format!("revision=\"{revision}\""), "revision is not a number")
        }),
    }
}

fn parse_date(date: Option<&str>) -> Result<Option<DateTime<Utc>>, SvnError> {
    match date.map(str::trim) {
        None | Some("") => Ok(None),
        Some(date) => DateTime::parse_from_rfc3339(date)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|err| SvnError::parse(&format!("<date>{date}</date>"), err.to_string())),
    }
}
