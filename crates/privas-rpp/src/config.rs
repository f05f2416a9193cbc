//! RPP configuration file.

use privas_core::{DEFAULT_BLOCK_SIZE, DEFAULT_RSA_BITS};
use serde::Deserialize;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Settings of one RPP daemon.
///
/// Every field has a default, so an empty file is a valid configuration.
/// Relative paths are resolved against the directory holding the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen: SocketAddr,
    /// Session working directories.
    pub data_dir: PathBuf,
    /// Reference panels, one `<name>.tsv` per dataset.
    pub datasets_dir: PathBuf,
    /// Name announced in `SendRPPConfiguration`.
    pub tps_name: String,
    /// TPS keypair.
    pub tps_dir: PathBuf,
    pub block_size: usize,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub rsa_bits: u32,
    /// Reference rows between two extraction progress reports.
    pub progress_every: usize,
    /// Jobs the local TPS runs at once.
    pub max_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8700)),
            data_dir: PathBuf::from("sessions"),
            datasets_dir: PathBuf::from("datasets"),
            tps_name: "local".to_string(),
            tps_dir: PathBuf::from("tps"),
            block_size: DEFAULT_BLOCK_SIZE,
            session_ttl_secs: 7 * 24 * 3600,
            sweep_interval_secs: 3600,
            rsa_bits: DEFAULT_RSA_BITS,
            progress_every: 10_000,
            max_jobs: 1,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.rebase_paths(path.parent().unwrap_or_else(|| Path::new(".")));
        Ok(config)
    }

    fn rebase_paths(&mut self, base: &Path) {
        for dir in [&mut self.data_dir, &mut self.datasets_dir, &mut self.tps_dir] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.listen.port(), 8700);
        assert_eq!(config.block_size, 32 * 1024);
        assert_eq!(config.session_ttl(), Duration::from_secs(604_800));
    }

    #[test]
    fn relative_paths_follow_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpp.toml");
        std::fs::write(
            &path,
            "listen = \"0.0.0.0:9000\"\ndata_dir = \"state\"\ntps_dir = \"/srv/tps\"\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.data_dir, dir.path().join("state"));
        assert_eq!(config.tps_dir, PathBuf::from("/srv/tps"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("listne = \"127.0.0.1:1\"").is_err());
    }
}
