/*
 * config.rs
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

//! Job configuration: fetch and send options, connection features and fixed limits.
//!
//! Every flag that changes how a job is dispatched lives in one of these records; code checks
//! the record rather than carrying its own copy. Records load from JSON, missing keys take
//! the defaults below.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed sizes and ceilings.
pub mod limits {
    /// Bytes of a file name in the retrieve list (including the terminating NUL).
    pub const MAX_FILENAME_LENGTH: usize = 256;
    /// ETag bytes stored per retrieve-list entry.
    pub const MAX_EXTRA_LS_DATA_LENGTH: usize = 64;
    /// Retrieve-list growth step in entries.
    pub const RETRIEVE_LIST_STEP_SIZE: usize = 50;
    /// Request header block ceiling.
    pub const MAX_HTTP_HEADER_BUFFER: usize = 16384;
    /// Response header block ceiling.
    pub const MAX_RESPONSE_HEAD: usize = 65536;
    /// Largest chunk size line accepted.
    pub const MAX_CHUNK_SIZE: u64 = 1 << 40;
    /// Approximate bytes one S3 `<Contents>` element takes in a list reply.
    pub const S3_LIST_ENTRY_ESTIMATE: u64 = 350;
    pub const S3_MAX_KEYS: u64 = 1000;
    /// Largest value of the WMO bulletin counter.
    pub const MAX_WMO_COUNTER: u32 = 999;
    /// Pause between attempts to take a busy lock.
    pub const LOCK_RETRY_INTERVAL_MS: u64 = 50;
    pub const DEFAULT_TRANSFER_TIMEOUT: u64 = 120;
    pub const DEFAULT_BLOCK_SIZE: usize = 65536;
    pub const DEFAULT_MAX_DIR_BUFFER: u64 = 10 * 1024 * 1024;
    pub const DEFAULT_USER_AGENT: &str = concat!("filedist/", env!("CARGO_PKG_VERSION"));
}

/// How the retrieve list treats files it has seen before.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StupidMode {
    /// Persistent list; a file is fetched again only when its size or date changes.
    #[default]
    No,
    /// No memory between scans: everything listed is fetched.
    Yes,
    /// Persistent list; a grown file is fetched from its previous size on.
    AppendOnly,
    /// Persistent list; a file is fetched once and never again, whatever changes.
    GetOnceOnly,
}

/// What happens to the remote file after a successful fetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoveMode {
    /// Delete it on the server.
    Yes,
    /// Keep it; remember it in the retrieve list.
    #[default]
    No,
    /// Keep it and remember nothing between scans.
    Neither,
}

/// S3 list API version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListVersion {
    #[serde(rename = "1")]
    V1,
    #[default]
    #[serde(rename = "2")]
    V2,
}

/// Comparison of a size or age filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Less,
    Greater,
    Equal,
}

impl Comparison {
    pub fn matches(self, value: u64, limit: u64) -> bool {
        match self {
            Comparison::Less => value < limit,
            Comparison::Greater => value > limit,
            Comparison::Equal => value == limit,
        }
    }

    fn symbol(self) -> char {
        match self {
            Comparison::Less => '<',
            Comparison::Greater => '>',
            Comparison::Equal => '=',
        }
    }
}

fn split_comparison(s: &str) -> (Comparison, &str) {
    let s = s.trim();
    match s.as_bytes().first() {
        Some(b'<') => (Comparison::Less, &s[1..]),
        Some(b'>') => (Comparison::Greater, &s[1..]),
        Some(b'=') => (Comparison::Equal, &s[1..]),
        _ => (Comparison::Equal, s),
    }
}

/// `ignore size`: skip files whose size compares true, e.g. `>1048576`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SizeFilter {
    pub cmp: Comparison,
    pub size: u64,
}

impl SizeFilter {
    /// True when a file of `size` bytes is to be ignored.
    pub fn ignores(&self, size: u64) -> bool {
        self.cmp.matches(size, self.size)
    }
}

impl FromStr for SizeFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (cmp, rest) = split_comparison(s);
        let size = rest
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("bad ignore size `{}`", s)))?;
        Ok(SizeFilter { cmp, size })
    }
}

impl TryFrom<String> for SizeFilter {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SizeFilter> for String {
    fn from(f: SizeFilter) -> String {
        f.to_string()
    }
}

impl fmt::Display for SizeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.cmp.symbol(), self.size)
    }
}

/// `ignore file time`: skip files whose age in seconds compares true, e.g. `>86400`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgeFilter {
    pub cmp: Comparison,
    pub seconds: u64,
}

impl AgeFilter {
    /// True when a file with modification time `mtime` is to be ignored at `now`.
    pub fn ignores(&self, mtime: i64, now: i64) -> bool {
        let age = now.saturating_sub(mtime).max(0) as u64;
        self.cmp.matches(age, self.seconds)
    }
}

impl FromStr for AgeFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (cmp, rest) = split_comparison(s);
        let seconds = rest
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("bad ignore file time `{}`", s)))?;
        Ok(AgeFilter { cmp, seconds })
    }
}

impl TryFrom<String> for AgeFilter {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AgeFilter> for String {
    fn from(f: AgeFilter) -> String {
        format!("{}{}", f.cmp.symbol(), f.seconds)
    }
}

/// Connection-level feature flags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFeatures {
    /// Verify the server certificate chain and host name.
    #[serde(default)]
    pub tls_strict_verify: bool,
    /// Allow legacy renegotiation with old servers.
    #[serde(default)]
    pub tls_legacy_renegotiation: bool,
    /// Never send `Expect: 100-continue`.
    #[serde(default)]
    pub no_expect: bool,
    /// S3 path-style addressing (`/bucket/key`) instead of `bucket.host`.
    #[serde(default)]
    pub bucketname_in_path: bool,
    /// Socket send buffer size.
    #[serde(default)]
    pub sndbuf_size: Option<u32>,
    /// Socket receive buffer size.
    #[serde(default)]
    pub rcvbuf_size: Option<u32>,
}

/// Options of a fetch job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchOptions {
    #[serde(default)]
    pub stupid_mode: StupidMode,
    #[serde(default)]
    pub remove: RemoveMode,
    /// Keep directory components of remote names (`/` becomes `\`).
    #[serde(default)]
    pub keep_path: bool,
    /// Leave `delimiter=/` out of S3 list requests.
    #[serde(default)]
    pub no_delimiter: bool,
    /// Take the local name from `Content-Disposition`.
    #[serde(default)]
    pub url_creates_file_name: bool,
    /// The URL names one file; no directory listing is fetched.
    #[serde(default)]
    pub dont_get_dir_list: bool,
    #[serde(default)]
    pub accept_dot_files: bool,
    /// The scanning process only lists and spawns helpers; it fetches nothing itself.
    #[serde(default)]
    pub one_process_just_scanning: bool,
    #[serde(default)]
    pub do_not_parallelise: bool,
    #[serde(default)]
    pub list_version: ListVersion,
    /// Harvest only `<a href>` links, whatever the listing looks like.
    #[serde(default)]
    pub href_search_only: bool,
    /// Seconds any single network operation may block.
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout: u64,
    /// Seconds to keep a connection open polling for new files (0 = one scan).
    #[serde(default)]
    pub keep_connected: u64,
    /// Seconds after which a reused connection is closed regardless of activity (0 = never).
    #[serde(default)]
    pub disconnect: u64,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_max_dir_buffer")]
    pub max_dir_buffer: u64,
    /// Bytes per second (0 = unlimited).
    #[serde(default)]
    pub rate_limit: u64,
    /// Files one process takes per scan (0 = unlimited).
    #[serde(default)]
    pub max_copied_files: u32,
    /// Bytes one process takes per scan (0 = unlimited).
    #[serde(default)]
    pub max_copied_file_size: u64,
    #[serde(default)]
    pub ignore_size: Option<SizeFilter>,
    #[serde(default)]
    pub ignore_file_time: Option<AgeFilter>,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub features: TransferFeatures,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            stupid_mode: StupidMode::default(),
            remove: RemoveMode::default(),
            keep_path: false,
            no_delimiter: false,
            url_creates_file_name: false,
            dont_get_dir_list: false,
            accept_dot_files: false,
            one_process_just_scanning: false,
            do_not_parallelise: false,
            list_version: ListVersion::default(),
            href_search_only: false,
            transfer_timeout: default_transfer_timeout(),
            keep_connected: 0,
            disconnect: 0,
            block_size: default_block_size(),
            max_dir_buffer: default_max_dir_buffer(),
            rate_limit: 0,
            max_copied_files: 0,
            max_copied_file_size: 0,
            ignore_size: None,
            ignore_file_time: None,
            retries: default_retries(),
            features: TransferFeatures::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl FetchOptions {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    /// The retrieve list is private and rebuilt every scan.
    pub fn private_list(&self) -> bool {
        self.stupid_mode == StupidMode::Yes || matches!(self.remove, RemoveMode::Yes | RemoveMode::Neither)
    }
}

/// Local-to-remote name rewrite applied before PUT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRule {
    /// Wildcard filter (`*`, `?`, leading `!` negates).
    pub filter: String,
    /// Replacement; `*` and `?` insert what the filter's wildcards matched, in order.
    pub rename_to: String,
}

/// Options of a send job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendOptions {
    /// The file name is a bulletin header; wrap the payload in bulletin framing.
    #[serde(default)]
    pub file_name_is_header: bool,
    /// Insert the WMO sequence counter after the start-of-heading.
    #[serde(default)]
    pub add_wmo_counter: bool,
    /// File holding the WMO counter.
    #[serde(default)]
    pub wmo_counter_file: Option<PathBuf>,
    #[serde(default)]
    pub trans_rename_rules: Vec<RenameRule>,
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    /// Seconds per archive subdirectory (0 = delete sent files).
    #[serde(default)]
    pub archive_time: u64,
    #[serde(default)]
    pub dup_check: bool,
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout: u64,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default)]
    pub rate_limit: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub features: TransferFeatures,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            file_name_is_header: false,
            add_wmo_counter: false,
            wmo_counter_file: None,
            trans_rename_rules: Vec::new(),
            archive_dir: None,
            archive_time: 0,
            dup_check: false,
            transfer_timeout: default_transfer_timeout(),
            block_size: default_block_size(),
            rate_limit: 0,
            retries: default_retries(),
            features: TransferFeatures::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl SendOptions {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::local("read", path, e))?;
    serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

fn default_transfer_timeout() -> u64 {
    limits::DEFAULT_TRANSFER_TIMEOUT
}

fn default_block_size() -> usize {
    limits::DEFAULT_BLOCK_SIZE
}

fn default_max_dir_buffer() -> u64 {
    limits::DEFAULT_MAX_DIR_BUFFER
}

fn default_retries() -> u32 {
    3
}

fn default_user_agent() -> String {
    limits::DEFAULT_USER_AGENT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_takes_defaults() {
        let o: FetchOptions = serde_json::from_str(
            r#"{"stupid_mode":"append-only","ignore_size":">1024","list_version":"1","features":{"no_expect":true}}"#,
        )
        .unwrap();
        assert_eq!(o.stupid_mode, StupidMode::AppendOnly);
        assert_eq!(o.list_version, ListVersion::V1);
        assert_eq!(o.ignore_size, Some(SizeFilter { cmp: Comparison::Greater, size: 1024 }));
        assert!(o.features.no_expect);
        assert_eq!(o.transfer_timeout, limits::DEFAULT_TRANSFER_TIMEOUT);
        assert_eq!(o.retries, 3);
        assert!(!o.private_list());
    }

    #[test]
    fn bad_filter_is_config_error() {
        let r: std::result::Result<FetchOptions, _> = serde_json::from_str(r#"{"ignore_size":"<big"}"#);
        assert!(r.is_err());
        assert!(matches!("x".parse::<AgeFilter>(), Err(Error::Config(_))));
    }

    #[test]
    fn filters_compare() {
        let f: SizeFilter = "<100".parse().unwrap();
        assert!(f.ignores(99));
        assert!(!f.ignores(100));
        let a: AgeFilter = ">3600".parse().unwrap();
        assert!(a.ignores(0, 7200));
        assert!(!a.ignores(7000, 7200));
        let e: SizeFilter = "0".parse().unwrap();
        assert_eq!(e.cmp, Comparison::Equal);
        assert_eq!(e.to_string(), "=0");
    }

    #[test]
    fn private_list_modes() {
        let mut o = FetchOptions::default();
        o.remove = RemoveMode::Yes;
        assert!(o.private_list());
        o.remove = RemoveMode::No;
        o.stupid_mode = StupidMode::Yes;
        assert!(o.private_list());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("send.json");
        std::fs::write(&p, r#"{"file_name_is_header":true,"trans_rename_rules":[{"filter":"*.tmp","rename_to":"*.dat"}]}"#).unwrap();
        let s = SendOptions::load(&p).unwrap();
        assert!(s.file_name_is_header);
        assert_eq!(s.trans_rename_rules[0].rename_to, "*.dat");
        assert!(SendOptions::load(&dir.path().join("missing.json")).is_err());
    }
}
