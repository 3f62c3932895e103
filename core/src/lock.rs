/*
 * lock.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Filedist, an automatic file-distribution system.
 *
 * Filedist is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Filedist is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Filedist.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Advisory byte-range locks (`fcntl`) shared by the retrieve list and the counter files.

use std::fs::File;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

/// Lock `len` bytes at `offset`. With `wait` false a held lock returns `Ok(false)`.
#[cfg(unix)]
pub fn lock_region(file: &File, kind: LockKind, offset: u64, len: u64, wait: bool) -> io::Result<bool> {
    let l_type = match kind {
        LockKind::Shared => libc::F_RDLCK,
        LockKind::Exclusive => libc::F_WRLCK,
    };
    set_lock(file, l_type as libc::c_short, offset, len, wait)
}

#[cfg(unix)]
pub fn unlock_region(file: &File, offset: u64, len: u64) -> io::Result<()> {
    set_lock(file, libc::F_UNLCK as libc::c_short, offset, len, false).map(|_| ())
}

#[cfg(unix)]
fn set_lock(file: &File, l_type: libc::c_short, offset: u64, len: u64, wait: bool) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: flock is plain data; all fields we rely on are set below.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = l_type;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = offset as libc::off_t;
    fl.l_len = len as libc::off_t;
    let cmd = if wait { libc::F_SETLKW } else { libc::F_SETLK };
    loop {
        // SAFETY: fd is open for the lifetime of `file`; fl outlives the call.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), cmd, &fl as *const libc::flock) };
        if rc != -1 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EAGAIN) | Some(libc::EACCES) if !wait => return Ok(false),
            _ => return Err(err),
        }
    }
}

#[cfg(not(unix))]
pub fn lock_region(_file: &File, _kind: LockKind, _offset: u64, _len: u64, _wait: bool) -> io::Result<bool> {
    Ok(true)
}

#[cfg(not(unix))]
pub fn unlock_region(_file: &File, _offset: u64, _len: u64) -> io::Result<()> {
    Ok(())
}
