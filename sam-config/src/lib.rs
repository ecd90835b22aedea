//! Archiver configuration snapshot
//!
//! Holds the complete archiver configuration of one daemon
//! ([`ArchiverConfig`]) and the operations that work across records:
//! archive-set assembly, criteria lookup by identity, pool usage and the
//! activation check.

use std::path::Path;
use std::time::Duration;

use anyhow::{format_err, Error};

use proxmox_sys::fs::CreateOptions;

mod archiver;
pub use archiver::ArchiverConfig;

pub mod archive_sets;

mod check;
pub use check::{check_config, CheckReport};

/// Errors callers may want to tell apart.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("pool '{pool}' is in use by copy '{copy}'")]
    PoolInUse { pool: String, copy: String },
}

/// Configuration file name
pub const ARCHIVER_CFG_FILENAME: &str = "/etc/opt/SUNWsamfs/archiver.json";
/// Lock file name (used to prevent concurrent access)
pub const ARCHIVER_CFG_LOCKFILE: &str = "/etc/opt/SUNWsamfs/.archiver.lck";

fn config_options() -> CreateOptions {
    CreateOptions::new().perm(nix::sys::stat::Mode::from_bits_truncate(0o0640))
}

/// Get exclusive lock
pub fn lock() -> Result<std::fs::File, Error> {
    proxmox_sys::fs::open_file_locked(
        ARCHIVER_CFG_LOCKFILE,
        Duration::new(10, 0),
        true,
        config_options(),
    )
}

/// Read and parse the configuration file
pub fn config() -> Result<(ArchiverConfig, [u8; 32]), Error> {
    load_config(ARCHIVER_CFG_FILENAME)
}

/// Save the configuration file
pub fn save_config(config: &ArchiverConfig) -> Result<(), Error> {
    store_config(ARCHIVER_CFG_FILENAME, config)
}

/// Reads a snapshot from `path`. A missing file is an empty configuration.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<(ArchiverConfig, [u8; 32]), Error> {
    let path = path.as_ref();
    let content = proxmox_sys::fs::file_read_optional_string(path)?.unwrap_or_default();
    let digest = openssl::sha::sha256(content.as_bytes());

    if content.trim().is_empty() {
        return Ok((ArchiverConfig::default(), digest));
    }

    let data = serde_json::from_str(&content)
        .map_err(|err| format_err!("unable to parse {:?} - {}", path, err))?;
    Ok((data, digest))
}

/// Atomically writes a snapshot to `path`.
pub fn store_config<P: AsRef<Path>>(path: P, config: &ArchiverConfig) -> Result<(), Error> {
    let raw = serde_json::to_string_pretty(config)?;
    proxmox_sys::fs::replace_file(path, raw.as_bytes(), config_options(), true)?;
    log::debug!("archiver configuration saved");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use sam_api_types::{Criterion, VsnPool};

    fn scratch_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sam-config-{}-{}", std::process::id(), name))
    }

    #[test]
    fn missing_file_is_empty_config() -> Result<(), Error> {
        let path = scratch_file("missing.json");
        let (config, _digest) = load_config(&path)?;
        assert_eq!(config, ArchiverConfig::default());
        Ok(())
    }

    #[test]
    fn store_and_load() -> Result<(), Error> {
        let path = scratch_file("store.json");

        let mut config = ArchiverConfig::default();
        config.pools.push(VsnPool::new("tapes", "lt", vec!["VSN001".into()]));
        config
            .global
            .criteria_mut()
            .push(Criterion::new(sam_api_types::GLOBAL, "images"));

        store_config(&path, &config)?;
        let (loaded, digest) = load_config(&path)?;
        std::fs::remove_file(&path)?;

        assert_eq!(loaded, config);
        let raw = serde_json::to_string_pretty(&config)?;
        assert_eq!(digest, openssl::sha::sha256(raw.as_bytes()));
        Ok(())
    }
}
