/*!
 * Shared Buffer
 * POSIX shm object of SLOT_COUNT * CHUNK bytes, mapped MAP_SHARED in both processes.
 *
 * No lock guards the slots. The server writes slot b, then sends token b;
 * the client reads slot b only after receiving it. The control channel's
 * ordering is what keeps the two sides off the same slot at the same time.
 */

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{fence, Ordering};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::token::slot_range;
use crate::SHM_SIZE;

pub struct SharedBuffer {
    base: NonNull<u8>,
    name: String,
    c_name: CString,
    // Creator unlinks the name on drop
    owner: bool,
    _fd: OwnedFd,
}

// The mapping is process-wide; moving the handle to another thread is fine.
unsafe impl Send for SharedBuffer {}

impl SharedBuffer {
    /// Server side: drop any stale object, create a fresh one and size it.
    pub fn create(name: &str) -> Result<Self> {
        let c_name = c_name(name)?;

        unsafe {
            // Leftover from a crashed run; absence is fine.
            libc::shm_unlink(c_name.as_ptr());

            let fd = libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o666);
            if fd < 0 {
                return Err(Error::shm("shm_open", name));
            }
            let fd = OwnedFd::from_raw_fd(fd);

            if libc::ftruncate(fd.as_raw_fd(), SHM_SIZE as libc::off_t) != 0 {
                let err = Error::shm("ftruncate", name);
                libc::shm_unlink(c_name.as_ptr());
                return Err(err);
            }

            let buffer = Self::map(fd, name, c_name, true)?;
            info!(shm = %name, size = SHM_SIZE, "shared buffer created");
            Ok(buffer)
        }
    }

    /// Client side: open the server's object; never creates or resizes it.
    pub fn open(name: &str) -> Result<Self> {
        let c_name = c_name(name)?;

        unsafe {
            let fd = libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666);
            if fd < 0 {
                return Err(Error::shm("shm_open", name));
            }
            let fd = OwnedFd::from_raw_fd(fd);

            let mut st: libc::stat = std::mem::zeroed();
            if libc::fstat(fd.as_raw_fd(), &mut st) != 0 {
                return Err(Error::shm("fstat", name));
            }
            let actual = st.st_size as usize;
            if actual < SHM_SIZE {
                return Err(Error::ShmTooSmall {
                    name: name.to_string(),
                    actual,
                    required: SHM_SIZE,
                });
            }

            let buffer = Self::map(fd, name, c_name, false)?;
            info!(shm = %name, size = SHM_SIZE, "shared buffer opened");
            Ok(buffer)
        }
    }

    unsafe fn map(fd: OwnedFd, name: &str, c_name: CString, owner: bool) -> Result<Self> {
        let ptr = libc::mmap(
            ptr::null_mut(),
            SHM_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        );
        if ptr == libc::MAP_FAILED {
            let err = Error::shm("mmap", name);
            if owner {
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(err);
        }

        Ok(Self {
            base: NonNull::new_unchecked(ptr as *mut u8),
            name: name.to_string(),
            c_name,
            owner,
            _fd: fd,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fill slot `index` with `value`.
    pub fn write_slot(&mut self, index: usize, value: u8) -> Result<()> {
        let range = slot_range(index)?;
        unsafe {
            ptr::write_bytes(self.base.as_ptr().add(range.start), value, range.len());
        }
        Ok(())
    }

    pub fn read_slot(&self, index: usize) -> Result<&[u8]> {
        let range = slot_range(index)?;
        unsafe {
            Ok(slice::from_raw_parts(
                self.base.as_ptr().add(range.start),
                range.len(),
            ))
        }
    }

    /// Check every byte of slot `index` equals `expected`.
    pub fn verify_slot(&self, index: usize, expected: u8) -> Result<()> {
        let bytes = self.read_slot(index)?;
        match bytes.iter().position(|&b| b != expected) {
            None => Ok(()),
            Some(offset) => Err(Error::IntegrityViolation {
                slot: index,
                offset,
                expected,
                found: bytes[offset],
            }),
        }
    }

    /// Orders slot stores before the token that announces them.
    #[inline]
    pub fn publish(&self) {
        fence(Ordering::Release);
    }

    /// Orders slot loads after the token that announced them.
    #[inline]
    pub fn acquire(&self) {
        fence(Ordering::Acquire);
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        unsafe {
            if libc::munmap(self.base.as_ptr() as *mut libc::c_void, SHM_SIZE) != 0 {
                warn!(shm = %self.name, error = %std::io::Error::last_os_error(), "munmap failed");
            }
            if self.owner {
                libc::shm_unlink(self.c_name.as_ptr());
                debug!(shm = %self.name, "shared buffer unlinked");
            }
        }
    }
}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name)
        .map_err(|_| Error::Config(format!("shared memory name {:?} contains a NUL byte", name)))
}
