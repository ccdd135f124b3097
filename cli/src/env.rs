use envconfig::Envconfig;
use std::path::PathBuf;
use svnc_common::env::Mode;
use svnc_core::command::RunnerConfig;

const MEGABYTE: usize = 1024 * 1024;

#[derive(Envconfig)]
pub(crate) struct Env {
    #[cfg_attr(
        debug_assertions,
        envconfig(from = "APP_MODE", default = "development")
    )]
    #[cfg_attr(
        not(debug_assertions),
        envconfig(from = "APP_MODE", default = "production")
    )]
    pub mode: Mode,

    #[envconfig(from = "SVN_BIN", default = "svn")]
    pub svn_bin: PathBuf,

    #[envconfig(from = "SVNC_LOCALE", default = "en_US.UTF-8")]
    pub locale: String,

    #[envconfig(from = "SVNC_OUTPUT_LIMIT_MB", default = "10")]
    pub output_limit_mb: usize,

    #[envconfig(from = "SVNC_PREVIEW_LIMIT_MB", default = "20")]
    pub preview_limit_mb: usize,

    #[envconfig(from = "SVNC_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    #[envconfig(from = "SVNC_EVENT_BUFFER", default = "256")]
    pub event_buffer: usize,

    #[envconfig(from = "SVN_PASSWORD")]
    pub password: Option<String>,
}

impl Env {
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            program: self.svn_bin.clone(),
            locale: self.locale.clone(),
            output_limit: self.output_limit_mb * MEGABYTE,
        }
    }

    pub fn preview_limit(&self) -> usize {
        self.preview_limit_mb * MEGABYTE
    }

    /// Scratch root for hand-off downloads and update working copies.
    pub fn scratch_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self
            .scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("svnc"));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

pub(crate) fn init() -> anyhow::Result<Env> {
    let config = Env::init_from_env()?;
    Ok(config)
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Env::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(config.svn_bin, PathBuf::from("svn"));
        assert_eq!(config.locale, "en_US.UTF-8");
        assert_eq!(config.runner_config().output_limit, 10 * MEGABYTE);
        assert_eq!(config.preview_limit(), 20 * MEGABYTE);
        assert_eq!(config.event_buffer, 256);
        assert!(config.password.is_none());
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            ("SVN_BIN".to_string(), "/opt/svn/bin/svn".to_string()),
            ("SVNC_OUTPUT_LIMIT_MB".to_string(), "1".to_string()),
            ("SVNC_SCRATCH_DIR".to_string(), "/var/tmp/svnc".to_string()),
        ]);
        let config = Env::init_from_hashmap(&vars).unwrap();
        assert_eq!(config.runner_config().program, PathBuf::from("/opt/svn/bin/svn"));
        assert_eq!(config.runner_config().output_limit, MEGABYTE);
        assert_eq!(config.scratch_dir, Some(PathBuf::from("/var/tmp/svnc")));
    }
}
