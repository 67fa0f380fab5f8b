use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    /// Root of the document and record stores.
    pub data_dir: PathBuf,
    /// Prefix of the signed read URLs handed out to clients.
    pub public_base_url: String,
    pub signed_url_secret: String,
    pub signed_url_ttl_secs: u64,
    /// Initial zoom of new editor sessions.
    pub render_scale: f64,
    /// Offset used for the date in the signature legend. Unset means the server's local
    /// offset, or UTC when that cannot be determined.
    pub legend_utc_offset_minutes: Option<i32>,
    pub signed_pdf_prefix: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 3000,
            data_dir: default_data_dir(),
            public_base_url: String::from("http://localhost:3000"),
            signed_url_secret: String::new(),
            signed_url_ttl_secs: 3600,
            render_scale: 1.5,
            legend_utc_offset_minutes: None,
            signed_pdf_prefix: String::from("signed"),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "signmap")
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_owned())
        .unwrap_or_else(|| PathBuf::from("data"))
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.json"))
}

impl Config {
    /// Reads the configuration file. Missing or unreadable files give the defaults.
    pub fn load(path: &Path) -> Config {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Config::default(),
            Err(e) => {
                log::warn!("Cannot read {}: {e}, using defaults", path.display());
                return Config::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Corrupted {}: {e}, using defaults", path.display());
                Config::default()
            }
        }
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    pub fn legend_offset(&self) -> UtcOffset {
        match self.legend_utc_offset_minutes {
            Some(minutes) => UtcOffset::from_whole_seconds(minutes * 60).unwrap_or_else(|e| {
                log::warn!("Invalid legend offset of {minutes} minutes: {e}");
                UtcOffset::UTC
            }),
            None => UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }

    /// Current time as it should appear in a signature legend.
    pub fn legend_now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.legend_offset())
    }
}
