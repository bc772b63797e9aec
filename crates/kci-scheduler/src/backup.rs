//! Optional backup-to-disk of generated job descriptions, gated by
//! `BACKUP_FILE_LIFETIME` (seconds). `BACKUP_DIR=/tmp/kci-backup`,
//! cleanup throttled to run at most once per hour.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const DEFAULT_BACKUP_DIR: &str = "/tmp/kci-backup";
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct BackupConfig {
    pub dir: PathBuf,
    pub lifetime: Duration,
}

impl BackupConfig {
    /// Reads `BACKUP_FILE_LIFETIME` from the environment; `None` if
    /// unset or zero (backup disabled).
    pub fn from_env() -> Option<Self> {
        let seconds: u64 = std::env::var("BACKUP_FILE_LIFETIME").ok()?.parse().ok()?;
        if seconds == 0 {
            return None;
        }
        Some(Self {
            dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            lifetime: Duration::from_secs(seconds),
        })
    }
}

/// Copy a rendered job description to `<dir>/<node_id>.submission`.
pub fn backup_job(config: &BackupConfig, node_id: &str, rendered: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(&config.dir)?;
    std::fs::write(config.dir.join(format!("{node_id}.submission")), rendered)
}

/// Remove backups older than `config.lifetime`. Callers are expected to
/// throttle calls to at most once per hour via `should_run_cleanup`.
pub fn cleanup(config: &BackupConfig) -> std::io::Result<u64> {
    if !config.dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(&config.dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if let Ok(modified) = metadata.modified() {
            if SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default()
                > config.lifetime
            {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

/// Whether enough time has passed since `last_run` to run `cleanup`
/// again.
pub fn should_run_cleanup(last_run: Option<SystemTime>) -> bool {
    match last_run {
        None => true,
        Some(t) => SystemTime::now().duration_since(t).unwrap_or_default() >= CLEANUP_INTERVAL,
    }
}

pub fn backup_file_path(dir: &Path, node_id: &str) -> PathBuf {
    dir.join(format!("{node_id}.submission"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn backup_and_cleanup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackupConfig {
            dir: dir.path().to_path_buf(),
            lifetime: Duration::from_millis(10),
        };
        backup_job(&config, "node1", "job: definition").unwrap();
        assert!(backup_file_path(&config.dir, "node1").exists());

        sleep(Duration::from_millis(20));
        let removed = cleanup(&config).unwrap();
        assert_eq!(removed, 1);
        assert!(!backup_file_path(&config.dir, "node1").exists());
    }

    #[test]
    fn disabled_when_env_var_is_zero_or_unset() {
        std::env::remove_var("BACKUP_FILE_LIFETIME");
        assert!(BackupConfig::from_env().is_none());
    }

    #[test]
    fn cleanup_throttled_to_once_per_hour() {
        assert!(should_run_cleanup(None));
        assert!(!should_run_cleanup(Some(SystemTime::now())));
    }
}
