use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use crate::gdrive::{DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE};

/// How the changelog is copied to Google Drive after a cycle.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Keep one changelog file in the archive folder and overwrite it.
    Replace,
    /// Upload a new timestamped copy on every publish.
    Snapshot,
}

/// Configuration for the drive-changelog service.
#[derive(Parser, Debug, Clone)]
#[command(name = "drive-changelog")]
#[command(about = "Tracks Google Drive changes into an append-only, diffed changelog")]
pub struct Config {
    /// Google credentials JSON: authorized-user or service-account key
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials: PathBuf,

    /// Drive folder that receives the published changelog
    #[arg(long, env = "FOLDER_ID")]
    pub folder_id: Option<String>,

    /// Seconds between sync cycles
    #[arg(long, env = "POLL_INTERVAL", value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,

    /// Publish the changelog to Drive after each cycle
    #[arg(
        long,
        env = "UPLOAD_ENABLED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = parse_flag
    )]
    pub upload_enabled: bool,

    /// Replace one archive file, or upload timestamped snapshots
    #[arg(long, env = "PUBLISH_MODE", value_enum, default_value_t = PublishMode::Replace)]
    pub publish_mode: PublishMode,

    /// Name of the archive folder created under the folder id
    #[arg(long, env = "ARCHIVE_FOLDER_NAME", default_value = "changelog")]
    pub archive_folder_name: String,

    /// Directory holding the cursor and the changelog
    #[arg(long, env = "STATE_DIR", default_value = ".")]
    pub state_dir: PathBuf,

    /// HTTP host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HTTP_HOST")]
    pub host: String,

    /// HTTP port to bind to
    #[arg(long, default_value = "8000", env = "HTTP_PORT")]
    pub port: u16,

    /// Timeout for a single Drive API request (seconds)
    #[arg(
        long,
        default_value = "30",
        env = "REQUEST_TIMEOUT",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub request_timeout: u64,

    /// Timeout for one archive publish (seconds)
    #[arg(
        long,
        default_value = "120",
        env = "PUBLISH_TIMEOUT",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub publish_timeout: u64,

    /// Change pages drained per cycle
    #[arg(
        long,
        default_value = "10",
        env = "MAX_PAGES_PER_CYCLE",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub max_pages_per_cycle: u64,

    /// Drive API v3 base URL
    #[arg(long, default_value = DEFAULT_API_BASE, env = "DRIVE_API_URL", hide = true)]
    pub drive_api_url: String,

    /// Drive upload API base URL
    #[arg(long, default_value = DEFAULT_UPLOAD_BASE, env = "DRIVE_UPLOAD_URL", hide = true)]
    pub drive_upload_url: String,
}

impl Config {
    /// Check combinations clap cannot express on its own.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.credentials.is_file() {
            anyhow::bail!(
                "Credentials file not found: {}",
                self.credentials.display()
            );
        }

        if self.upload_enabled {
            match self.folder_id.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => {}
                _ => anyhow::bail!("FOLDER_ID is required when upload is enabled"),
            }
        }

        if self.archive_folder_name.trim().is_empty() {
            anyhow::bail!("ARCHIVE_FOLDER_NAME must not be empty");
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout)
    }
}

/// Boolean accepting the usual spellings of on/off.
fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected one of 1/true/yes/on or 0/false/no/off, got '{}'", other)),
    }
}
