use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use svnc_core::association::AssociationTable;

const SETTINGS_FILE: &str = "settings.json";

/// A repository the user connected to before. Passwords are never stored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct SavedServer {
    pub id: String,
    pub alias: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Settings {
    #[serde(default)]
    pub servers: Vec<SavedServer>,
    #[serde(default)]
    pub last_active: Option<String>,
    #[serde(default)]
    pub associations: AssociationTable,
}

impl Settings {
    pub fn server(&self, id: &str) -> Option<&SavedServer> {
        self.servers.iter().find(|server| server.id == id)
    }

    /// Adds the server or replaces the one with the same id. Returns true on replace.
    pub fn upsert(&mut self, server: SavedServer) -> bool {
        match self.servers.iter_mut().find(|saved| saved.id == server.id) {
            Some(saved) => {
                *saved = server;
                true
            }
            None => {
                self.servers.push(server);
                false
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.servers.len();
        self.servers.retain(|server| server.id != id);
        if self.last_active.as_deref() == Some(id) {
            self.last_active = None;
        }
        self.servers.len() != before
    }
}

#[derive(Debug)]
pub(crate) struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(org: &str, app: &str) -> std::io::Result<Self> {
        let proj = ProjectDirs::from("com", org, app)
            .ok_or_else(|| std::io::Error::other("No project dirs"))?;

        let dir = proj.data_local_dir();
        fs::create_dir_all(dir)?;

        Ok(Self::at(dir.join(SETTINGS_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Missing or unreadable settings start over from defaults.
    pub fn load(&self) -> anyhow::Result<Settings> {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<Settings>(&bytes) {
                Ok(settings) => Ok(settings),
                Err(e) => {
                    warn!(
                        "Failed to deserialize settings from {:?}: {} (line {}, column {}). Resetting settings.",
                        self.path,
                        e,
                        e.line(),
                        e.column()
                    );
                    Ok(Settings::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no settings at {:?}, using defaults", self.path);
                Ok(Settings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(settings)?;
        atomic_write(&self.path, &bytes)
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("No parent dir"))?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    info!("settings persisted to {:?}", path);
    Ok(())
}
