//! Ownership lock for a durable association store directory.
//!
//! The owning process holds an exclusive OS lock on `<dir>/owner.lock` and
//! records its pid in that file, so a second open can say which process
//! holds the store. The lock is released when the [`DirLock`] is dropped.

use std::fs::{self, File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "owner.lock";

/// Exclusive ownership of an association store directory.
#[derive(Debug)]
pub struct DirLock {
    _file: File,
    dir: PathBuf,
}

impl DirLock {
    /// Take ownership of `dir` without blocking.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another process owns the store; the
    ///   message names the directory and, when known, the owner's pid
    /// - any I/O error creating or writing the lock file
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !try_lock(&file)? {
            let owner = read_owner(&path)
                .map_or_else(String::new, |pid| format!(" (pid {pid})"));
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!(
                    "association store {} is owned by another process{owner}",
                    dir.display()
                ),
            ));
        }

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self {
            _file: file,
            dir: dir.to_path_buf(),
        })
    }

    /// The owned store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pid recorded by the current owner of `dir`, if any.
    #[must_use]
    pub fn owner_of(dir: &Path) -> Option<u32> {
        read_owner(&dir.join(LOCK_FILE))
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Returns `Ok(false)` when another handle already holds the lock.
#[cfg(unix)]
fn try_lock(file: &File) -> IoResult<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and valid for this call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(windows)]
fn try_lock(file: &File) -> IoResult<bool> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    let handle = file.as_raw_handle() as HANDLE;
    // SAFETY: the handle is owned by `file`; OVERLAPPED is plain data.
    let rc = unsafe {
        let mut overlapped = std::mem::zeroed::<OVERLAPPED>();
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if rc != 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(any(unix, windows)))]
fn try_lock(_file: &File) -> IoResult<bool> {
    Err(IoError::new(
        ErrorKind::Unsupported,
        "association store locking is not supported on this platform",
    ))
}
