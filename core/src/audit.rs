/*
 * audit.rs
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

//! Output and delete log records.
//!
//! One record per line, fields separated by `|`:
//! `prefix|local|remote|size|job_id|retries|unique|ticks|archive_len|type[|archive_path]`.
//! `remote` is empty when it equals `local`. Transfer time is in ticks of 1/100 s.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub const SEPARATOR: char = '|';
pub const TICKS_PER_SECOND: u64 = 100;

/// What happened to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Fetched into the local directory.
    Received,
    /// Sent and unlinked.
    Sent,
    /// Sent and moved into the archive.
    Archived,
    /// Skipped because of `ignore_size`.
    IgnoredSize,
    /// Skipped because of `ignore_file_time`.
    IgnoredAge,
    /// Deleted on the server after fetching.
    RemovedRemote,
    /// The server no longer had it.
    Gone,
    /// Not sent: already sent before.
    Duplicate,
}

impl RecordKind {
    pub fn tag(self) -> char {
        match self {
            RecordKind::Received => 'R',
            RecordKind::Sent => 'S',
            RecordKind::Archived => 'A',
            RecordKind::IgnoredSize => 'I',
            RecordKind::IgnoredAge => 'T',
            RecordKind::RemovedRemote => 'X',
            RecordKind::Gone => 'G',
            RecordKind::Duplicate => 'D',
        }
    }
}

pub fn ticks(d: Duration) -> u64 {
    d.as_millis() as u64 * TICKS_PER_SECOND / 1000
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub unique_prefix: String,
    pub local_name: String,
    pub remote_name: Option<String>,
    pub size: u64,
    pub job_id: u32,
    pub retries: u32,
    pub unique_number: u32,
    pub transfer_ticks: u64,
    pub archive_path: Option<String>,
    pub kind: RecordKind,
}

impl AuditRecord {
    pub fn new(kind: RecordKind, local_name: impl Into<String>, size: u64, job_id: u32) -> AuditRecord {
        AuditRecord {
            unique_prefix: String::new(),
            local_name: local_name.into(),
            remote_name: None,
            size,
            job_id,
            retries: 0,
            unique_number: 0,
            transfer_ticks: 0,
            archive_path: None,
            kind,
        }
    }

    pub fn format(&self) -> String {
        let remote = match &self.remote_name {
            Some(r) if *r != self.local_name => r.as_str(),
            _ => "",
        };
        let archive_len = self.archive_path.as_ref().map_or(0, |a| a.len());
        let mut line = format!(
            "{p}{s}{l}{s}{r}{s}{size}{s}{job}{s}{retries}{s}{unique}{s}{ticks}{s}{alen}{s}{tag}",
            s = SEPARATOR,
            p = self.unique_prefix,
            l = self.local_name,
            r = remote,
            size = self.size,
            job = self.job_id,
            retries = self.retries,
            unique = self.unique_number,
            ticks = self.transfer_ticks,
            alen = archive_len,
            tag = self.kind.tag(),
        );
        if let Some(a) = &self.archive_path {
            line.push(SEPARATOR);
            line.push_str(a);
        }
        line
    }
}

/// Append-only log file; every record is synced before `append` returns.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> AuditLog {
        AuditLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::local("open", &self.path, e))?;
        let mut line = record.format();
        line.push('\n');
        f.write_all(line.as_bytes())
            .map_err(|e| Error::local("write", &self.path, e))?;
        f.sync_data().map_err(|e| Error::local("sync", &self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout() {
        let mut r = AuditRecord::new(RecordKind::Received, "obs.grib", 250, 7);
        r.unique_prefix = "5f5e1000_1".into();
        r.remote_name = Some("2020/obs.grib".into());
        r.retries = 1;
        r.transfer_ticks = 42;
        assert_eq!(r.format(), "5f5e1000_1|obs.grib|2020/obs.grib|250|7|1|0|42|0|R");
        r.remote_name = Some("obs.grib".into());
        r.archive_path = Some("host/7/160".into());
        r.kind = RecordKind::Archived;
        assert_eq!(r.format(), "5f5e1000_1|obs.grib||250|7|1|0|42|10|A|host/7/160");
    }

    #[test]
    fn ticks_are_hundredths() {
        assert_eq!(ticks(Duration::from_millis(1234)), 123);
    }

    #[test]
    fn append_adds_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("output.log"));
        log.append(&AuditRecord::new(RecordKind::Gone, "a", 0, 1)).unwrap();
        log.append(&AuditRecord::new(RecordKind::IgnoredSize, "b", 9, 1)).unwrap();
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text, "|a||0|1|0|0|0|0|G\n|b||9|1|0|0|0|0|I\n");
    }
}
