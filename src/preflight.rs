#![forbid(unsafe_code)]

//! Checks performed by the CLI before touching the data directory.

use std::path::Path;

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start as root. The server only ever needs read access to the
/// archives and write access to its own data directory.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; use a regular user account");
    }
    Ok(())
}

/// The working directory holds `tube.db` and must already exist.
pub fn ensure_data_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        bail!("{} does not exist", dir.display());
    }
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Uid;

    #[test]
    fn allows_unprivileged_uid() {
        assert!(ensure_not_root_for(Uid::from_raw(1000), "archivetube").is_ok());
    }

    #[test]
    fn rejects_root_uid() {
        let err = ensure_not_root_for(Uid::from_raw(0), "archivetube").unwrap_err();
        assert!(err.to_string().contains("must not be run as root"));
    }

    #[test]
    fn data_dir_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_data_dir(dir.path()).is_ok());
        assert!(ensure_data_dir(&dir.path().join("missing")).is_err());
        let file = dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        let err = ensure_data_dir(&file).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
