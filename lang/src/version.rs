//! Build stamp derived from the compiler's own sources.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

/// Subtracted from every stamp to keep the numbers small.
pub const TIME_EPOCH: i64 = 1141027200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStamp {
    source_dir: PathBuf,
    forced: Option<i64>,
}

impl Default for VersionStamp {
    fn default() -> Self {
        Self::new(concat!(env!("CARGO_MANIFEST_DIR"), "/src"))
    }
}

impl VersionStamp {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            forced: None,
        }
    }

    /// Newest modification time among the `.rs` files under the source
    /// directory, minus [`TIME_EPOCH`]. Zero when the sources can't be read,
    /// as happens when running from an installed binary.
    pub fn number(&self) -> i64 {
        if let Some(forced) = self.forced {
            return forced;
        }
        match newest_mtime(&self.source_dir) {
            Ok(Some(secs)) => secs.saturating_sub(TIME_EPOCH),
            Ok(None) => 0,
            Err(e) => {
                tracing::debug!(dir = %self.source_dir.display(), "no version stamp: {e}");
                0
            }
        }
    }

    /// Pins the stamp to `version` (a unix time), or with `None` goes back to
    /// reading it from the sources.
    pub fn set(&mut self, version: Option<i64>) {
        self.forced = version.map(|v| v.saturating_sub(TIME_EPOCH));
    }
}

fn newest_mtime(dir: &Path) -> io::Result<Option<i64>> {
    let mut newest = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let mtime = if file_type.is_dir() {
            newest_mtime(&path)?
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            let modified = entry.metadata()?.modified()?;
            let secs = modified
                .duration_since(UNIX_EPOCH)
                .map_err(io::Error::other)?
                .as_secs();
            Some(i64::try_from(secs).map_err(io::Error::other)?)
        } else {
            None
        };
        newest = newest.max(mtime);
    }
    Ok(newest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_without_changes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("lib.rs"), "").unwrap();
        fs::write(dir.path().join("nested/mod.rs"), "").unwrap();

        let stamp = VersionStamp::new(dir.path());
        let first = stamp.number();
        assert!(first > 0);
        assert!(stamp.number() >= first);
    }

    #[test]
    fn ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        assert_eq!(VersionStamp::new(dir.path()).number(), 0);
    }

    #[test]
    fn unreadable_dir_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = VersionStamp::new(dir.path().join("missing"));
        assert_eq!(stamp.number(), 0);
    }

    #[test]
    fn forced_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.rs"), "").unwrap();
        let mut stamp = VersionStamp::new(dir.path());
        let automatic = stamp.number();

        stamp.set(Some(TIME_EPOCH + 42));
        assert_eq!(stamp.number(), 42);
        assert_eq!(stamp.number(), 42);

        stamp.set(None);
        assert_eq!(stamp.number(), automatic);
    }

    #[test]
    fn forcing_extreme_times_saturates() {
        let mut stamp = VersionStamp::new("/nonexistent/scriptc-sources");
        stamp.set(Some(i64::MIN));
        assert_eq!(stamp.number(), i64::MIN);
        stamp.set(Some(i64::MAX));
        assert_eq!(stamp.number(), i64::MAX - TIME_EPOCH);
    }

    #[test]
    fn own_sources_are_found() {
        assert!(VersionStamp::default().number() > 0);
    }
}
