/*
 * counter.rs
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

//! File-backed counters (WMO bulletin sequence, unique names). Each `next` opens the file,
//! takes an exclusive lock, reads, increments, writes and closes, so concurrent processes
//! never hand out the same value.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::limits;
use crate::error::{Error, Result};
use crate::lock::{lock_region, unlock_region, LockKind};

#[derive(Debug, Clone)]
pub struct Counter {
    path: PathBuf,
    /// Values wrap to 0 after this one.
    max: u32,
}

impl Counter {
    pub fn new(path: impl Into<PathBuf>, max: u32) -> Counter {
        Counter { path: path.into(), max }
    }

    /// The 000-999 counter inserted into WMO bulletins.
    pub fn wmo(path: impl Into<PathBuf>) -> Counter {
        Counter::new(path, limits::MAX_WMO_COUNTER)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand out the next value.
    pub fn next(&self) -> Result<u32> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| Error::local("open", &self.path, e))?;
        lock_region(&file, LockKind::Exclusive, 0, 0, true)
            .map_err(|e| Error::LockConflict(format!("{}: {}", self.path.display(), e)))?;
        let r = self.bump(&mut file);
        // closing the file releases the lock as well
        let _ = unlock_region(&file, 0, 0);
        r
    }

    fn bump(&self, file: &mut std::fs::File) -> Result<u32> {
        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|e| Error::local("read", &self.path, e))?;
        let current = match text.trim() {
            "" => None,
            t => Some(t.parse::<u32>().map_err(|_| {
                tracing::warn!(path = %self.path.display(), content = t, "counter file corrupt, restarting at 0");
            })),
        };
        let value = match current {
            Some(Ok(v)) if v < self.max => v + 1,
            _ => 0,
        };
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::local("seek", &self.path, e))?;
        file.set_len(0)
            .map_err(|e| Error::local("truncate", &self.path, e))?;
        file.write_all(value.to_string().as_bytes())
            .map_err(|e| Error::local("write", &self.path, e))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let c = Counter::new(dir.path().join("cnt"), 2);
        let values: Vec<u32> = (0..5).map(|_| c.next().unwrap()).collect();
        assert_eq!(values, [0, 1, 2, 0, 1]);
    }

    #[test]
    fn wmo_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wmo");
        std::fs::write(&path, "998").unwrap();
        let c = Counter::wmo(&path);
        assert_eq!(c.next().unwrap(), 999);
        assert_eq!(c.next().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
    }

    #[test]
    fn corrupt_file_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cnt");
        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(Counter::new(&path, 10).next().unwrap(), 0);
    }
}
