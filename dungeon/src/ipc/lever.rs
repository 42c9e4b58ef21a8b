//! Levers: named binary semaphores shared by the dungeon and its workers
//!
//! A lever is either available (count 1) or held (count 0). No owner is
//! recorded; the hold/release pairing is enforced in worker code by
//! [`LeverGuard`], which posts exactly once when dropped.

use std::ffi::CString;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::IpcError;
use super::region::validate_name;

/// Permission bits for newly created levers
const LEVER_MODE: libc::c_uint = 0o600;

/// One named binary semaphore
#[derive(Debug)]
pub struct Lever {
    sem: *mut libc::sem_t,
    name: String,
    owns_name: bool,
}

impl Lever {
    /// Create an available lever, replacing a stale one left by a crashed run
    pub fn create(name: &str) -> Result<Self, IpcError> {
        debug!(name, "Lever::create: called");
        let c_name = c_name(name)?;
        let flags = libc::O_CREAT | libc::O_EXCL;

        // SAFETY: c_name is a valid NUL-terminated string; mode and value are
        // passed as c_uint as required by the variadic signature.
        let mut sem = unsafe { libc::sem_open(c_name.as_ptr(), flags, LEVER_MODE, 1 as libc::c_uint) };
        if sem == libc::SEM_FAILED && io::Error::last_os_error().raw_os_error() == Some(libc::EEXIST) {
            warn!(name, "Removing stale lever semaphore");
            // SAFETY: valid C string
            unsafe { libc::sem_unlink(c_name.as_ptr()) };
            // SAFETY: as above
            sem = unsafe { libc::sem_open(c_name.as_ptr(), flags, LEVER_MODE, 1 as libc::c_uint) };
        }
        if sem == libc::SEM_FAILED {
            return Err(IpcError::sem(name, "sem_open"));
        }

        info!(name, "Lever created");
        Ok(Self {
            sem,
            name: name.to_string(),
            owns_name: true,
        })
    }

    /// Open a lever created by the dungeon
    pub fn open(name: &str) -> Result<Self, IpcError> {
        debug!(name, "Lever::open: called");
        let c_name = c_name(name)?;
        // SAFETY: valid C string; no O_CREAT so no variadic arguments are read.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(IpcError::sem(name, "sem_open"));
        }
        Ok(Self {
            sem,
            name: name.to_string(),
            owns_name: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the lever is available, then hold it
    pub fn acquire(&self) -> Result<(), IpcError> {
        loop {
            // SAFETY: self.sem is an open semaphore until drop
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            if io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                return Err(IpcError::sem(&self.name, "sem_wait"));
            }
        }
    }

    /// Hold the lever if it is available; never blocks
    pub fn try_acquire(&self) -> Result<bool, IpcError> {
        loop {
            // SAFETY: self.sem is an open semaphore until drop
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            match io::Error::last_os_error().raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(IpcError::sem(&self.name, "sem_trywait")),
            }
        }
    }

    /// Wait at most `timeout` for the lever; `Ok(false)` when it stayed held
    #[cfg(target_os = "linux")]
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<bool, IpcError> {
        let deadline = realtime_deadline(timeout);
        loop {
            // SAFETY: self.sem is open; deadline is a valid timespec
            if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                return Ok(true);
            }
            match io::Error::last_os_error().raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(IpcError::sem(&self.name, "sem_timedwait")),
            }
        }
    }

    /// Wait at most `timeout` for the lever; `Ok(false)` when it stayed held
    #[cfg(not(target_os = "linux"))]
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<bool, IpcError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.try_acquire()? {
                return Ok(true);
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Make the lever available again
    ///
    /// Releasing a lever nobody holds breaks the binary invariant; worker code
    /// goes through [`LeverGuard`] instead of calling this directly.
    pub fn release(&self) -> Result<(), IpcError> {
        // SAFETY: self.sem is an open semaphore until drop
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(IpcError::sem(&self.name, "sem_post"));
        }
        Ok(())
    }

    /// Whether the lever is currently available, or `None` where the platform
    /// cannot report semaphore values
    pub fn is_available(&self) -> Option<bool> {
        let mut value: libc::c_int = 0;
        // SAFETY: self.sem is open; value is a valid out pointer
        if unsafe { libc::sem_getvalue(self.sem, &mut value) } != 0 {
            debug!(name = %self.name, "Lever::is_available: sem_getvalue unsupported");
            return None;
        }
        Some(value > 0)
    }
}

impl Drop for Lever {
    fn drop(&mut self) {
        debug!(name = %self.name, owns_name = self.owns_name, "Lever::drop: called");
        // SAFETY: self.sem came from sem_open and is closed exactly once
        if unsafe { libc::sem_close(self.sem) } != 0 {
            warn!(name = %self.name, error = %io::Error::last_os_error(), "sem_close failed");
        }
        if self.owns_name {
            if let Err(e) = remove_stale(&self.name) {
                warn!(name = %self.name, error = %e, "sem_unlink failed");
            } else {
                info!(name = %self.name, "Lever unlinked");
            }
        }
    }
}

// SAFETY: POSIX semaphores may be used concurrently from any thread.
unsafe impl Send for Lever {}
unsafe impl Sync for Lever {}

/// A held lever; dropping it releases the lever
#[derive(Debug)]
pub struct LeverGuard {
    lever: Arc<Lever>,
}

impl LeverGuard {
    /// Wrap a lever the caller has just acquired
    pub fn held(lever: Arc<Lever>) -> Self {
        Self { lever }
    }

    pub fn name(&self) -> &str {
        self.lever.name()
    }
}

impl Drop for LeverGuard {
    fn drop(&mut self) {
        match self.lever.release() {
            Ok(()) => debug!(name = %self.lever.name(), "Released lever"),
            Err(e) => warn!(name = %self.lever.name(), error = %e, "Failed to release lever"),
        }
    }
}

/// The two levers of the treasure room
#[derive(Debug, Clone)]
pub struct Levers {
    pub one: Arc<Lever>,
    pub two: Arc<Lever>,
}

impl Levers {
    /// Create both levers (dungeon side)
    pub fn create(one: &str, two: &str) -> Result<Self, IpcError> {
        let one = Arc::new(Lever::create(one)?);
        let two = Arc::new(Lever::create(two)?);
        Ok(Self { one, two })
    }

    /// Open both levers (worker side)
    pub fn open(one: &str, two: &str) -> Result<Self, IpcError> {
        let one = Arc::new(Lever::open(one)?);
        let two = Arc::new(Lever::open(two)?);
        Ok(Self { one, two })
    }
}

/// Unlink a lever name; missing names are not an error
pub fn remove_stale(name: &str) -> Result<bool, IpcError> {
    let c_name = c_name(name)?;
    // SAFETY: valid C string
    if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
        return Ok(true);
    }
    if io::Error::last_os_error().raw_os_error() == Some(libc::ENOENT) {
        return Ok(false);
    }
    Err(IpcError::sem(name, "sem_unlink"))
}

fn c_name(name: &str) -> Result<CString, IpcError> {
    validate_name(name)?;
    CString::new(name).map_err(|_| IpcError::InvalidName(name.to_string()))
}

#[cfg(target_os = "linux")]
fn realtime_deadline(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: valid out pointer; CLOCK_REALTIME always exists
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };

    let nanos = now.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
    libc::timespec {
        tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t + (nanos / 1_000_000_000) as libc::time_t,
        tv_nsec: (nanos % 1_000_000_000) as libc::c_long,
    }
}
