/*
 * retrieve_list.rs
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

//! Retrieve list: the persistent per-directory table of remote files already seen.
//!
//! The file starts with a 16-byte header (`count` as its first word, then the entry stride and
//! a magic tag); entries follow at a fixed stride. Workers sharing a directory coordinate with
//! `fcntl` locks: byte 8 of the header guards whole-list operations (merge, compaction), and
//! the first byte of each entry guards that entry's `assigned` field. An entry is owned by at
//! most one worker, recorded as `worker_id + 1`.
//!
//! Entries are addressed by name. Compaction by another worker moves entries to new slots, so
//! every entry update runs under the shared list lock and checks the slot on disk still holds
//! the named entry before touching it.
//!
//! In private mode (stupid mode, or any remove mode) the table lives on the heap only and
//! starts empty at every scan.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::{limits, StupidMode};
use crate::error::{Error, Result};
use crate::listing::{DatePrecision, ListEntry};
use crate::lock::{lock_region, unlock_region, LockKind};

const HEADER_SIZE: u64 = 16;
const LIST_LOCK_OFFSET: u64 = 8;
const MAGIC: [u8; 4] = *b"FDRL";
const NAME_LEN: usize = limits::MAX_FILENAME_LENGTH;
const EXTRA_LEN: usize = if cfg!(feature = "extra-data") {
    limits::MAX_EXTRA_LS_DATA_LENGTH
} else {
    0
};
const FIXED_LEN: usize = 3 * 8 + 4 + 4;
/// Bytes per entry on disk.
pub const ENTRY_SIZE: usize = NAME_LEN + EXTRA_LEN + FIXED_LEN;

/// One remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveEntry {
    pub name: String,
    /// Bytes, -1 when unknown.
    pub size: i64,
    /// Size at the previous fetch, for append-only resume.
    pub prev_size: i64,
    /// Unix seconds, -1 when unknown.
    pub mtime: i64,
    pub got_date: bool,
    pub retrieved: bool,
    pub in_list: bool,
    /// 0 = free, else `worker_id + 1`.
    pub assigned: u32,
    pub special_flag: u8,
    pub etag: Option<String>,
}

impl RetrieveEntry {
    /// Size and date were confirmed exactly (HEAD or an exact listing).
    pub const GOT_EXACT_SIZE_DATE: u8 = 0x01;

    fn new(name: &str) -> RetrieveEntry {
        RetrieveEntry {
            name: name.to_string(),
            size: -1,
            prev_size: 0,
            mtime: -1,
            got_date: false,
            retrieved: false,
            in_list: true,
            assigned: 0,
            special_flag: 0,
            etag: None,
        }
    }

    pub fn has_exact_size_date(&self) -> bool {
        self.special_flag & Self::GOT_EXACT_SIZE_DATE != 0
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; ENTRY_SIZE];
        let name = self.name.as_bytes();
        buf[..name.len()].copy_from_slice(name);
        let mut at = NAME_LEN;
        if EXTRA_LEN > 0 {
            if let Some(etag) = &self.etag {
                let bytes = etag.as_bytes();
                let n = bytes.len().min(EXTRA_LEN - 1);
                buf[at..at + n].copy_from_slice(&bytes[..n]);
            }
            at += EXTRA_LEN;
        }
        for v in [self.size, self.prev_size, self.mtime] {
            buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
            at += 8;
        }
        buf[at] = self.got_date as u8;
        buf[at + 1] = self.retrieved as u8;
        buf[at + 2] = self.in_list as u8;
        buf[at + 3] = self.special_flag;
        buf[at + 4..at + 8].copy_from_slice(&self.assigned.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> RetrieveEntry {
        let text = |b: &[u8]| {
            let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
            String::from_utf8_lossy(&b[..end]).into_owned()
        };
        let name = text(&buf[..NAME_LEN]);
        let mut at = NAME_LEN;
        let etag = if EXTRA_LEN > 0 {
            let e = text(&buf[at..at + EXTRA_LEN]);
            at += EXTRA_LEN;
            (!e.is_empty()).then_some(e)
        } else {
            None
        };
        let mut word = || {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            at += 8;
            i64::from_le_bytes(b)
        };
        let size = word();
        let prev_size = word();
        let mtime = word();
        let mut assigned = [0u8; 4];
        assigned.copy_from_slice(&buf[at + 4..at + 8]);
        RetrieveEntry {
            name,
            size,
            prev_size,
            mtime,
            got_date: buf[at] != 0,
            retrieved: buf[at + 1] != 0,
            in_list: buf[at + 2] != 0,
            special_flag: buf[at + 3],
            assigned: u32::from_le_bytes(assigned),
            etag,
        }
    }
}

/// Result of merging one listing tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merged {
    pub index: usize,
    pub is_new: bool,
    /// Size, date or ETag differ from what was stored; the entry is up for fetching again.
    pub changed: bool,
}

/// Outcome of trying to take an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assign {
    Assigned,
    /// Another worker owns it or it was retrieved meanwhile.
    Taken,
}

/// Lockable part of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Whole-list operations.
    List,
    Entry(usize),
}

fn region_range(region: Region) -> (u64, u64) {
    match region {
        Region::List => (LIST_LOCK_OFFSET, 1),
        Region::Entry(i) => (entry_offset(i), 1),
    }
}

fn entry_offset(index: usize) -> u64 {
    HEADER_SIZE + (index as u64) * ENTRY_SIZE as u64
}

fn capacity_for(count: usize) -> usize {
    let step = limits::RETRIEVE_LIST_STEP_SIZE;
    count.div_ceil(step).max(1) * step
}

/// Size within the error of a K/M/G column: `1.5K` matches 1500.
fn size_matches(stored: i64, listed: &ListEntry) -> bool {
    let Some(listed_size) = listed.size else {
        return true;
    };
    let listed_size = listed_size as i64;
    if stored < 0 {
        return false;
    }
    if listed.size_is_authoritative || !listed.size_unit_was_applied {
        return stored == listed_size;
    }
    let mut unit: i64 = 1;
    while unit.saturating_mul(1024) <= listed_size {
        unit *= 1024;
    }
    (stored - listed_size).abs() < unit
}

/// Date at the listing's precision.
fn mtime_matches(stored: i64, listed: &ListEntry) -> bool {
    let Some(listed_mtime) = listed.mtime else {
        return true;
    };
    if stored < 0 {
        return false;
    }
    let unit = match listed.date_precision {
        DatePrecision::Day => 86_400,
        DatePrecision::Minute => 60,
        _ => 1,
    };
    stored.div_euclid(unit) == listed_mtime.div_euclid(unit)
}

#[derive(Debug)]
pub struct RetrieveList {
    path: PathBuf,
    file: Option<File>,
    entries: Vec<RetrieveEntry>,
    last_index: Option<usize>,
    worker_id: u32,
    /// List lock currently held by this handle.
    list_lock: Option<LockKind>,
}

impl RetrieveList {
    /// Open (creating if needed) the list for `alias` under `dir`. A private list touches no file.
    pub fn attach(dir: &Path, alias: &str, private: bool, worker_id: u32) -> Result<RetrieveList> {
        let file_name: String = alias
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        let path = dir.join(format!("{}.rl", file_name));
        let mut list = RetrieveList {
            path,
            file: None,
            entries: Vec::new(),
            last_index: None,
            worker_id,
            list_lock: None,
        };
        if private {
            tracing::debug!(alias, "using private retrieve list");
            return Ok(list);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&list.path)
            .map_err(|e| Error::local("open", &list.path, e))?;
        list.file = Some(file);
        list.lock_exclusive(Region::List)?;
        let loaded = list.load();
        list.unlock(Region::List)?;
        loaded?;
        tracing::debug!(alias, entries = list.entries.len(), path = %list.path.display(), "attached retrieve list");
        Ok(list)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_private(&self) -> bool {
        self.file.is_none()
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RetrieveEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&RetrieveEntry> {
        self.entries.get(index)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    fn local_err(&self, op: &'static str, e: std::io::Error) -> Error {
        Error::local(op, &self.path, e)
    }

    fn lock(&mut self, region: Region, kind: LockKind) -> Result<()> {
        if let Some(file) = &self.file {
            let (offset, len) = region_range(region);
            lock_region(file, kind, offset, len, true).map_err(|e| Error::LockConflict(format!("{}: {}", self.path.display(), e)))?;
            if region == Region::List {
                self.list_lock = Some(kind);
            }
        }
        Ok(())
    }

    pub fn lock_shared(&mut self, region: Region) -> Result<()> {
        self.lock(region, LockKind::Shared)
    }

    pub fn lock_exclusive(&mut self, region: Region) -> Result<()> {
        self.lock(region, LockKind::Exclusive)
    }

    pub fn unlock(&mut self, region: Region) -> Result<()> {
        if let Some(file) = &self.file {
            let (offset, len) = region_range(region);
            unlock_region(file, offset, len).map_err(|e| Error::LockConflict(format!("{}: {}", self.path.display(), e)))?;
            if region == Region::List {
                self.list_lock = None;
            }
        }
        Ok(())
    }

    /// Run `f` with the list lock held, taking it shared unless this handle holds it already.
    /// `fcntl` locks do not nest, so an outer lock must not be released here.
    fn under_list_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.file.is_none() || self.list_lock.is_some() {
            return f(self);
        }
        self.lock_shared(Region::List)?;
        let r = f(self);
        self.unlock(Region::List)?;
        r
    }

    /// Re-read the header and every entry. Caller holds the list lock.
    fn load(&mut self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let mut f = file;
        let len = f.metadata().map_err(|e| self.local_err("stat", e))?.len();
        let mut header = [0u8; HEADER_SIZE as usize];
        let valid = len >= HEADER_SIZE && {
            f.seek(SeekFrom::Start(0)).map_err(|e| self.local_err("seek", e))?;
            f.read_exact(&mut header).map_err(|e| self.local_err("read", e))?;
            header[12..16] == MAGIC && u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize == ENTRY_SIZE
        };
        if !valid {
            if len > 0 {
                tracing::warn!(path = %self.path.display(), "retrieve list has a foreign layout, starting afresh");
            }
            self.entries.clear();
            self.last_index = None;
            return self.write_all();
        }
        let count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let available = ((len - HEADER_SIZE) / ENTRY_SIZE as u64) as usize;
        let count = if count > available {
            tracing::warn!(path = %self.path.display(), count, available, "retrieve list count exceeds file, truncating");
            available
        } else {
            count
        };
        let mut raw = vec![0u8; count * ENTRY_SIZE];
        f.seek(SeekFrom::Start(HEADER_SIZE)).map_err(|e| self.local_err("seek", e))?;
        f.read_exact(&mut raw).map_err(|e| self.local_err("read", e))?;
        self.entries = raw.chunks_exact(ENTRY_SIZE).map(RetrieveEntry::decode).collect();
        if self.last_index.is_some_and(|i| i >= self.entries.len()) {
            self.last_index = None;
        }
        Ok(())
    }

    /// Pick up changes made by other workers.
    pub fn refresh(&mut self) -> Result<()> {
        self.under_list_lock(|list| list.load())
    }

    fn write_count(&self) -> Result<()> {
        let Some(mut f) = self.file.as_ref() else {
            return Ok(());
        };
        let mut header = [0u8; HEADER_SIZE as usize];
        header[..4].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());
        header[4..8].copy_from_slice(&(ENTRY_SIZE as u32).to_le_bytes());
        header[12..16].copy_from_slice(&MAGIC);
        f.seek(SeekFrom::Start(0)).map_err(|e| self.local_err("seek", e))?;
        f.write_all(&header).map_err(|e| self.local_err("write", e))
    }

    fn write_entry(&self, index: usize) -> Result<()> {
        let (Some(mut f), Some(entry)) = (self.file.as_ref(), self.entries.get(index)) else {
            return Ok(());
        };
        f.seek(SeekFrom::Start(entry_offset(index))).map_err(|e| self.local_err("seek", e))?;
        f.write_all(&entry.encode()).map_err(|e| self.local_err("write", e))
    }

    /// Name stored in slot `index` on disk, `None` past the stored count. Caller holds the
    /// list lock.
    fn stored_name(&self, index: usize) -> Result<Option<String>> {
        let Some(mut f) = self.file.as_ref() else {
            return Ok(self.entries.get(index).map(|e| e.name.clone()));
        };
        let mut count = [0u8; 4];
        f.seek(SeekFrom::Start(0)).map_err(|e| self.local_err("seek", e))?;
        f.read_exact(&mut count).map_err(|e| self.local_err("read", e))?;
        if index >= u32::from_le_bytes(count) as usize {
            return Ok(None);
        }
        let mut raw = vec![0u8; NAME_LEN];
        f.seek(SeekFrom::Start(entry_offset(index))).map_err(|e| self.local_err("seek", e))?;
        f.read_exact(&mut raw).map_err(|e| self.local_err("read", e))?;
        let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
        Ok(Some(String::from_utf8_lossy(&raw[..end]).into_owned()))
    }

    fn read_entry(&mut self, index: usize) -> Result<()> {
        let Some(mut f) = self.file.as_ref() else {
            return Ok(());
        };
        let mut raw = vec![0u8; ENTRY_SIZE];
        f.seek(SeekFrom::Start(entry_offset(index))).map_err(|e| self.local_err("seek", e))?;
        f.read_exact(&mut raw).map_err(|e| self.local_err("read", e))?;
        if let Some(slot) = self.entries.get_mut(index) {
            *slot = RetrieveEntry::decode(&raw);
        }
        Ok(())
    }

    /// Rewrite header and all entries, sizing the file to the step capacity.
    fn write_all(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        self.resize(self.entries.len())?;
        self.write_count()?;
        let Some(mut f) = self.file.as_ref() else {
            return Ok(());
        };
        let mut raw = Vec::with_capacity(self.entries.len() * ENTRY_SIZE);
        for e in &self.entries {
            raw.extend_from_slice(&e.encode());
        }
        f.seek(SeekFrom::Start(HEADER_SIZE)).map_err(|e| self.local_err("seek", e))?;
        f.write_all(&raw).map_err(|e| self.local_err("write", e))
    }

    /// Grow or shrink the backing file to hold `new_count` entries, in whole steps.
    pub fn resize(&mut self, new_count: usize) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let want = HEADER_SIZE + (capacity_for(new_count) * ENTRY_SIZE) as u64;
        let have = file
            .metadata()
            .map_err(|e| Error::RetrieveListResize(format!("{}: {}", self.path.display(), e)))?
            .len();
        if have != want {
            file.set_len(want)
                .map_err(|e| Error::RetrieveListResize(format!("{}: {}", self.path.display(), e)))?;
            tracing::trace!(path = %self.path.display(), from = have, to = want, "resized retrieve list");
        }
        Ok(())
    }

    /// Forget every entry.
    pub fn reset(&mut self) -> Result<()> {
        self.entries.clear();
        self.last_index = None;
        if self.file.is_some() {
            self.lock_exclusive(Region::List)?;
            let r = self.write_all();
            self.unlock(Region::List)?;
            r?;
        }
        Ok(())
    }

    /// Start a merge pass: reload, then clear `in_list` everywhere. A private list starts empty.
    pub fn begin_scan(&mut self) -> Result<()> {
        self.last_index = None;
        if self.file.is_none() {
            self.entries.clear();
            return Ok(());
        }
        self.load()?;
        for e in &mut self.entries {
            e.in_list = false;
        }
        Ok(())
    }

    fn position(&mut self, name: &str) -> Option<usize> {
        let next = self.last_index.map_or(0, |i| i + 1);
        if self.entries.get(next).is_some_and(|e| e.name == name) {
            return Some(next);
        }
        self.entries.iter().position(|e| e.name == name)
    }

    /// Fold one listing tuple into the table. Caller holds the list lock (exclusive).
    pub fn merge(&mut self, listed: &ListEntry, mode: StupidMode) -> Result<Merged> {
        if listed.name.len() >= NAME_LEN {
            return Err(Error::FieldOverflow {
                field: "file name",
                limit: NAME_LEN - 1,
            });
        }
        let listed_size = listed.size.map_or(-1, |s| s as i64);
        let exact = listed.is_exact();
        match self.position(&listed.name) {
            Some(index) => {
                self.last_index = Some(index);
                let e = &mut self.entries[index];
                e.in_list = true;
                let etag_changed = EXTRA_LEN > 0
                    && matches!((&e.etag, &listed.etag), (Some(old), Some(new)) if old != new);
                let changed = mode != StupidMode::GetOnceOnly
                    && (!size_matches(e.size, listed) || !mtime_matches(e.mtime, listed) || etag_changed);
                if changed {
                    if mode == StupidMode::AppendOnly && e.retrieved && listed_size > e.size && e.size > 0 {
                        e.prev_size = e.size;
                    } else {
                        e.prev_size = 0;
                    }
                    if listed_size >= 0 {
                        e.size = listed_size;
                    }
                    if let Some(m) = listed.mtime {
                        e.mtime = m;
                        e.got_date = true;
                    }
                    if listed.etag.is_some() {
                        e.etag = listed.etag.clone();
                    }
                    e.special_flag = if exact { RetrieveEntry::GOT_EXACT_SIZE_DATE } else { 0 };
                    e.retrieved = false;
                    e.assigned = 0;
                }
                self.write_entry(index)?;
                Ok(Merged {
                    index,
                    is_new: false,
                    changed,
                })
            }
            None => {
                let mut e = RetrieveEntry::new(&listed.name);
                e.size = listed_size;
                if let Some(m) = listed.mtime {
                    e.mtime = m;
                    e.got_date = true;
                }
                e.etag = listed.etag.clone();
                if exact {
                    e.special_flag = RetrieveEntry::GOT_EXACT_SIZE_DATE;
                }
                self.entries.push(e);
                let index = self.entries.len() - 1;
                self.last_index = Some(index);
                if self.file.is_some() {
                    self.resize(self.entries.len())?;
                    self.write_entry(index)?;
                    self.write_count()?;
                }
                Ok(Merged {
                    index,
                    is_new: true,
                    changed: true,
                })
            }
        }
    }

    /// Drop entries that were not in the last listing and are not being fetched. Returns how
    /// many went.
    pub fn compact(&mut self) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|e| e.in_list || e.assigned != 0);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.last_index = None;
            self.write_all()?;
            tracing::debug!(path = %self.path.display(), removed, "compacted retrieve list");
        }
        Ok(removed)
    }

    /// Slot of the entry called `name`, reloading the table when another worker's compaction
    /// moved it. Caller holds the list lock.
    fn locate(&mut self, name: &str) -> Result<Option<usize>> {
        if let Some(index) = self.find(name) {
            if self.stored_name(index)?.as_deref() == Some(name) {
                return Ok(Some(index));
            }
        }
        if self.file.is_none() {
            return Ok(None);
        }
        tracing::debug!(file = name, path = %self.path.display(), "retrieve list entries moved, reloading");
        self.load()?;
        Ok(self.find(name))
    }

    /// Re-read the entry called `name` under its entry lock, apply `f` and write it back.
    /// `None` when the entry is no longer in the list.
    fn with_entry<T>(&mut self, name: &str, f: impl FnOnce(&mut RetrieveEntry) -> T) -> Result<Option<T>> {
        self.under_list_lock(|list| {
            let Some(index) = list.locate(name)? else {
                return Ok(None);
            };
            list.lock_exclusive(Region::Entry(index))?;
            let r = list.read_entry(index).and_then(|()| {
                let out = f(&mut list.entries[index]);
                list.write_entry(index).map(|()| Some(out))
            });
            list.unlock(Region::Entry(index))?;
            r
        })
    }

    /// Take the entry called `name` for this worker.
    pub fn try_assign(&mut self, name: &str) -> Result<Assign> {
        let owner = self.worker_id + 1;
        let took = self.with_entry(name, |e| {
            if e.retrieved || (e.assigned != 0 && e.assigned != owner) {
                return false;
            }
            e.assigned = owner;
            true
        })?;
        Ok(if took == Some(true) { Assign::Assigned } else { Assign::Taken })
    }

    fn update<F: FnOnce(&mut RetrieveEntry)>(&mut self, name: &str, f: F) -> Result<()> {
        if self.with_entry(name, f)?.is_none() {
            tracing::debug!(file = name, path = %self.path.display(), "entry no longer in retrieve list");
        }
        Ok(())
    }

    /// Fetched (or deliberately skipped): never offered again until it changes.
    pub fn mark_retrieved(&mut self, name: &str) -> Result<()> {
        self.update(name, |e| {
            e.retrieved = true;
            e.assigned = 0;
        })
    }

    /// The server no longer has it.
    pub fn mark_gone(&mut self, name: &str) -> Result<()> {
        self.update(name, |e| {
            e.retrieved = true;
            e.in_list = false;
            e.assigned = 0;
        })
    }

    /// Give the entry back without fetching it.
    pub fn release(&mut self, name: &str) -> Result<()> {
        self.update(name, |e| e.assigned = 0)
    }

    /// Store exact size and date, e.g. from a HEAD.
    pub fn set_exact(&mut self, name: &str, size: Option<u64>, mtime: Option<i64>) -> Result<()> {
        self.update(name, |e| {
            if let Some(s) = size {
                e.size = s as i64;
            }
            if let Some(m) = mtime {
                e.mtime = m;
                e.got_date = true;
            }
            e.special_flag |= RetrieveEntry::GOT_EXACT_SIZE_DATE;
        })
    }

    /// Release everything still assigned to this worker. Returns how many were released.
    pub fn release_all(&mut self) -> Result<usize> {
        let owner = self.worker_id + 1;
        let mine: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.assigned == owner)
            .map(|e| e.name.clone())
            .collect();
        for name in &mine {
            self.release(name)?;
        }
        Ok(mine.len())
    }

    /// Release this worker's entries and close the file.
    pub fn detach(mut self) -> Result<()> {
        let released = self.release_all()?;
        if released > 0 {
            tracing::debug!(path = %self.path.display(), released, "released assigned entries on detach");
        }
        if let Some(file) = self.file.take() {
            file.sync_data().map_err(|e| Error::local("sync", &self.path, e))?;
        }
        Ok(())
    }
}
