//! Named fixed-size shared-memory segment.
//!
//! A segment is a file under the shared-memory directory mapped into every
//! process that attaches to it. Access goes through [`Segment::lock`], which
//! takes an in-process mutex and then an exclusive advisory lock on the file
//! so two processes never touch the buffer at the same time.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;
use memmap2::MmapMut;
use tracing::{debug, warn};

use crate::error::IpcError;
use crate::ipc::layout;

/// Smallest segment accepted: the count header plus one small record.
pub const MIN_SEGMENT_SIZE: usize = 64;

pub struct Segment {
    name: String,
    path: PathBuf,
    file: File,
    map: Mutex<MmapMut>,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Segment {
    /// Create (or recreate) a zeroed segment of `size` bytes.
    pub fn create(dir: &Path, name: &str, size: usize) -> Result<Self, IpcError> {
        validate_name(name)?;
        if size < MIN_SEGMENT_SIZE {
            return Err(IpcError::SegmentTooSmall {
                size,
                min: MIN_SEGMENT_SIZE,
            });
        }

        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size as u64)?;

        let segment = Self::map(name, path, file)?;
        {
            let mut guard = segment.lock()?;
            layout::init(&mut guard);
        }
        debug!(segment = %segment.name, size, "Created shared memory segment");
        Ok(segment)
    }

    /// Attach to a segment some other process created.
    pub fn attach(dir: &Path, name: &str) -> Result<Self, IpcError> {
        validate_name(name)?;
        let path = dir.join(name);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(IpcError::SegmentNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len() as usize;
        if size < MIN_SEGMENT_SIZE {
            return Err(IpcError::SegmentTooSmall {
                size,
                min: MIN_SEGMENT_SIZE,
            });
        }
        let segment = Self::map(name, path, file)?;
        debug!(segment = %segment.name, size, "Attached to shared memory segment");
        Ok(segment)
    }

    fn map(name: &str, path: PathBuf, file: File) -> Result<Self, IpcError> {
        // SAFETY: every access to the mapping happens through `lock`, which
        // serializes this process with the mutex and other processes with the
        // exclusive file lock. The file length is fixed after creation.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            name: name.to_string(),
            path,
            file,
            map: Mutex::new(map),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exclusive access to the segment bytes until the guard drops.
    pub fn lock(&self) -> Result<SegmentGuard<'_>, IpcError> {
        let map = self
            .map
            .lock()
            .map_err(|_| IpcError::LockPoisoned(self.name.clone()))?;
        FileExt::lock_exclusive(&self.file)?;
        Ok(SegmentGuard {
            file: &self.file,
            map,
        })
    }

    /// Flush outstanding writes. The segment stays in place for other
    /// processes.
    pub fn close(&self) -> Result<(), IpcError> {
        let map = self
            .map
            .lock()
            .map_err(|_| IpcError::LockPoisoned(self.name.clone()))?;
        map.flush()?;
        debug!(segment = %self.name, "Closed shared memory segment");
        Ok(())
    }

    /// Remove the backing file. Processes still attached keep their mapping.
    pub fn unlink(&self) -> Result<(), IpcError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(segment = %self.name, "Unlinked shared memory segment");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Locked view of a segment. Derefs to the whole mapped buffer.
pub struct SegmentGuard<'a> {
    file: &'a File,
    map: MutexGuard<'a, MmapMut>,
}

impl Deref for SegmentGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map[..]
    }
}

impl DerefMut for SegmentGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        // Runs before the mutex guard field is released.
        if let Err(e) = FileExt::unlock(self.file) {
            warn!(error = %e, "Failed to release segment file lock");
        }
    }
}

fn validate_name(name: &str) -> Result<(), IpcError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.contains('/') || name.contains('\\') {
        Some("name contains a path separator")
    } else if name.contains('\0') {
        Some("name contains a NUL byte")
    } else if name == "." || name == ".." {
        Some("name is a relative path component")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(IpcError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
