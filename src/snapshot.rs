use crate::session::{Axis, Snapshot, SnapshotSink};
use crate::Error;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Publishes snapshots as node-exporter textfiles.
///
/// Each snapshot is written to `<path>.tmp` and then renamed onto `<path>`, so
/// a collector reading `<path>` never sees a partially written file. Both files
/// should live on the same filesystem (typically a ramdisk) for the rename to
/// be atomic.
#[derive(Debug, Clone)]
pub struct FileSink {
    sys_path: PathBuf,
    impedance_path: PathBuf,
}

impl FileSink {
    pub const DEFAULT_DIRECTORY: &'static str = "/ramdisk";
    pub const DEFAULT_SYS_FILE: &'static str = "BMS_A_sys.prom";
    pub const DEFAULT_IMPEDANCE_FILE: &'static str = "BMS_A_imp.prom";

    pub fn new(sys_path: impl Into<PathBuf>, impedance_path: impl Into<PathBuf>) -> Self {
        Self {
            sys_path: sys_path.into(),
            impedance_path: impedance_path.into(),
        }
    }

    pub fn in_directory(
        directory: impl AsRef<Path>,
        sys_file: impl AsRef<Path>,
        impedance_file: impl AsRef<Path>,
    ) -> Self {
        let directory = directory.as_ref();
        Self::new(directory.join(sys_file), directory.join(impedance_file))
    }

    pub fn path(&self, axis: Axis) -> &Path {
        match axis {
            Axis::System => &self.sys_path,
            Axis::Impedance => &self.impedance_path,
        }
    }

    fn staging_path(path: &Path) -> PathBuf {
        let mut staging = path.as_os_str().to_owned();
        staging.push(".tmp");
        PathBuf::from(staging)
    }
}

impl Default for FileSink {
    fn default() -> Self {
        Self::in_directory(
            Self::DEFAULT_DIRECTORY,
            Self::DEFAULT_SYS_FILE,
            Self::DEFAULT_IMPEDANCE_FILE,
        )
    }
}

impl SnapshotSink for FileSink {
    fn publish(&mut self, snapshot: &Snapshot) -> Result<(), Error> {
        let path = self.path(snapshot.axis());
        let staging = Self::staging_path(path);
        {
            let mut file = File::create(&staging)?;
            file.write_all(snapshot.to_string().as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&staging, path)?;
        log::debug!("Published {}:\n{}", path.display(), snapshot);
        Ok(())
    }
}
