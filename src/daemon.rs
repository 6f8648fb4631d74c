//! Daemon surface files under `.codeplane/`.
//!
//! `daemon.pid` and `daemon.port` are one-line files written at startup
//! and removed on clean shutdown; other processes use them to discover
//! a running engine.

use std::path::{Path, PathBuf};

use crate::domain::CoreError;

pub struct DaemonFiles {
    pid_path: PathBuf,
    port_path: PathBuf,
}

impl DaemonFiles {
    /// Write both files, overwriting any stale leftovers from an
    /// unclean shutdown.
    pub fn write(state_dir: &Path, port: u16) -> Result<Self, CoreError> {
        std::fs::create_dir_all(state_dir)?;
        let pid_path = state_dir.join("daemon.pid");
        let port_path = state_dir.join("daemon.port");
        std::fs::write(&pid_path, format!("{}\n", std::process::id()))?;
        std::fs::write(&port_path, format!("{port}\n"))?;
        Ok(Self { pid_path, port_path })
    }

    /// Read the advertised port of a running daemon, if any.
    pub fn read_port(state_dir: &Path) -> Option<u16> {
        std::fs::read_to_string(state_dir.join("daemon.port"))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.pid_path);
        let _ = std::fs::remove_file(&self.port_path);
    }
}

impl Drop for DaemonFiles {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        {
            let files = DaemonFiles::write(dir.path(), 7345).unwrap();
            assert!(dir.path().join("daemon.pid").exists());
            assert_eq!(DaemonFiles::read_port(dir.path()), Some(7345));
            files.remove();
        }
        assert!(!dir.path().join("daemon.pid").exists());
        assert_eq!(DaemonFiles::read_port(dir.path()), None);
    }

    #[test]
    fn test_drop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _files = DaemonFiles::write(dir.path(), 9000).unwrap();
        }
        assert!(!dir.path().join("daemon.port").exists());
    }
}
