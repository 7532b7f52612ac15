use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use tracing::debug;

use crate::channel::layout::LAYOUT_SIZE;
use crate::channel::MempoolKey;
use crate::error::ChannelError;

/// Location of the segment bound to `key` inside `dir`.
pub fn segment_path(dir: &Path, key: MempoolKey) -> PathBuf {
    dir.join(format!("rl-campaign-{key}.shm"))
}

/// Exclusive binding of a mempool key to a fixed-size shared segment.
///
/// The binding is an advisory `flock` on the segment file, so it is released
/// by the kernel if the holder dies. At most one `SharedSegment` per key can
/// exist on a host at a time, including within one process.
#[derive(Debug)]
pub struct SharedSegment {
    key: MempoolKey,
    path: PathBuf,
    file: Option<File>,
}

impl SharedSegment {
    /// Bind `key`, creating and zeroing the segment.
    pub fn acquire(dir: &Path, key: MempoolKey, size: u64) -> Result<Self, ChannelError> {
        fs::create_dir_all(dir)?;
        let path = segment_path(dir, key);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {}
            Err(e) if e == Errno::EWOULDBLOCK => return Err(ChannelError::Unavailable { key }),
            Err(e) => return Err(ChannelError::Io(e.into())),
        }

        // Previous contents belong to an earlier run.
        file.set_len(0)?;
        file.set_len(size.max(LAYOUT_SIZE))?;

        debug!(%key, path = %path.display(), "segment acquired");
        Ok(SharedSegment {
            key,
            path,
            file: Some(file),
        })
    }

    pub fn key(&self) -> MempoolKey {
        self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_bound(&self) -> bool {
        self.file.is_some()
    }

    pub(crate) fn file(&self) -> io::Result<&File> {
        self.file.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "segment already released")
        })
    }

    /// Drop the binding. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = flock(file.as_raw_fd(), FlockArg::Unlock);
            debug!(key = %self.key, "segment released");
        }
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        self.release();
    }
}
