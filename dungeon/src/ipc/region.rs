//! Named POSIX shared memory holding the [`DungeonState`]
//!
//! The dungeon creates the segment, every worker attaches to it. The
//! creating side owns the name and unlinks it when dropped.

use std::fs::File;
use std::mem::size_of;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;
use tracing::{debug, info, warn};

use super::error::IpcError;
use super::state::{DungeonState, STATE_MAGIC};

/// A mapping of the shared dungeon segment
pub struct SharedRegion {
    ptr: NonNull<DungeonState>,
    len: usize,
    name: String,
    owns_name: bool,
}

impl SharedRegion {
    /// Create a zero-initialised segment and stamp it with this process as coordinator
    ///
    /// A segment left behind by a crashed run is unlinked and recreated.
    pub fn create(name: &str) -> Result<Self, IpcError> {
        debug!(name, "SharedRegion::create: called");
        validate_name(name)?;

        let flags = OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;
        let fd = match shm_open(name, flags, mode) {
            Err(Errno::EEXIST) => {
                warn!(name, "Removing stale shared memory segment");
                shm_unlink(name).map_err(|e| IpcError::shm(name, "shm_unlink", e))?;
                shm_open(name, flags, mode).map_err(|e| IpcError::shm(name, "shm_open", e))?
            }
            other => other.map_err(|e| IpcError::shm(name, "shm_open", e))?,
        };

        let file = File::from(fd);
        let len = size_of::<DungeonState>();
        if let Err(e) = file.set_len(len as u64) {
            let _ = shm_unlink(name);
            return Err(IpcError::shm(name, "ftruncate", e));
        }

        let region = match map(&file, len) {
            Ok(ptr) => Self {
                ptr,
                len,
                name: name.to_string(),
                owns_name: true,
            },
            Err(e) => {
                let _ = shm_unlink(name);
                return Err(IpcError::shm(name, "mmap", e));
            }
        };

        region.state().initialize(std::process::id() as i32);
        info!(name, len, "Shared memory created and mapped");
        Ok(region)
    }

    /// Attach to a segment created by the dungeon
    pub fn open(name: &str) -> Result<Self, IpcError> {
        debug!(name, "SharedRegion::open: called");
        validate_name(name)?;

        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|e| IpcError::shm(name, "shm_open", e))?;
        let file = File::from(fd);
        let actual = file.metadata().map_err(|e| IpcError::shm(name, "fstat", e))?.len() as usize;
        let len = size_of::<DungeonState>();
        if actual < len {
            return Err(IpcError::LayoutMismatch {
                name: name.to_string(),
                reason: format!("segment is {} bytes, expected {}", actual, len),
            });
        }

        let ptr = map(&file, len).map_err(|e| IpcError::shm(name, "mmap", e))?;
        let region = Self {
            ptr,
            len,
            name: name.to_string(),
            owns_name: false,
        };

        let magic = region.state().magic();
        if magic != STATE_MAGIC {
            return Err(IpcError::LayoutMismatch {
                name: name.to_string(),
                reason: format!("magic {:#010x}", magic),
            });
        }

        debug!(name, "SharedRegion::open: attached");
        Ok(region)
    }

    /// The shared block
    pub fn state(&self) -> &DungeonState {
        // SAFETY: the mapping is valid, page aligned and at least `len` bytes
        // for the lifetime of `self`, and all-zero bytes are a valid DungeonState.
        unsafe { self.ptr.as_ref() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether dropping this mapping unlinks the segment name
    pub fn owns_name(&self) -> bool {
        self.owns_name
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        debug!(name = %self.name, owns_name = self.owns_name, "SharedRegion::drop: called");
        // SAFETY: ptr/len describe a mapping created by `map` and not yet unmapped.
        if let Err(e) = unsafe { munmap(self.ptr.cast(), self.len) } {
            warn!(name = %self.name, error = %e, "munmap failed");
        }

        if self.owns_name {
            match shm_unlink(self.name.as_str()) {
                Ok(()) => info!(name = %self.name, "Shared memory unlinked"),
                Err(e) => warn!(name = %self.name, error = %e, "shm_unlink failed"),
            }
        }
    }
}

// SAFETY: DungeonState is made of atomics; the mapping stays valid until drop.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

/// Remove a segment name left behind by a crashed run; missing names are not an error
pub fn remove_stale(name: &str) -> Result<bool, IpcError> {
    validate_name(name)?;
    match shm_unlink(name) {
        Ok(()) => Ok(true),
        Err(Errno::ENOENT) => Ok(false),
        Err(e) => Err(IpcError::shm(name, "shm_unlink", e)),
    }
}

fn map(file: &File, len: usize) -> nix::Result<NonNull<DungeonState>> {
    let length = NonZeroUsize::new(len).ok_or(Errno::EINVAL)?;
    // SAFETY: fresh shared mapping of a file we hold open; no existing Rust
    // references alias it.
    let ptr = unsafe {
        mmap(
            None,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            file,
            0,
        )?
    };
    Ok(ptr.cast())
}

/// POSIX names are a single leading slash followed by no further slashes
pub(crate) fn validate_name(name: &str) -> Result<(), IpcError> {
    let valid = name.len() > 1 && name.starts_with('/') && !name[1..].contains('/') && !name.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(IpcError::InvalidName(name.to_string()))
    }
}
