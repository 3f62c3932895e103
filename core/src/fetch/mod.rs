/*
 * mod.rs
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

//! Fetcher: list a remote directory, reconcile the listing with the retrieve list, download
//! the files this worker owns and rename them into place.
//!
//! One `Fetcher` runs one job and, when the coordinator hands out further jobs for the same
//! endpoint, keeps the session for them (burst). Exit housekeeping (replaying a rename that
//! was interrupted, releasing entries still assigned to this worker, the summary line) runs
//! from `run` and, should the future be dropped, from `Drop`.

mod naming;

pub use naming::{disposition_name, escape_separators, final_name, no_name, temp_name};

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;

use crate::audit::{ticks, AuditLog, AuditRecord, RecordKind};
use crate::config::{FetchOptions, RemoveMode, StupidMode};
use crate::error::{Error, Result};
use crate::listing::{self, DatePrecision, ListEntry, ListingOptions};
use crate::protocol::http::{
    split_bucket, ConnectParams, GetOutcome, HeadOutcome, HttpSession, ListingRequest, Proxy,
};
use crate::rate::RateLimiter;
use crate::retrieve_list::{Assign, Region, RetrieveList};
use crate::url::{Service, Url};

const KEEP_CONNECTED_POLL: Duration = Duration::from_secs(5);

/// One source directory to fetch from.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub job_id: u32,
    /// Directory alias; names the retrieve list.
    pub alias: String,
    pub url: Url,
    pub proxy: Option<Proxy>,
    pub options: FetchOptions,
    /// Where fetched files land.
    pub local_dir: PathBuf,
    /// Where retrieve lists live.
    pub list_dir: PathBuf,
    pub worker_id: u32,
    /// Prefix of every audit record of this job.
    pub unique_prefix: String,
}

/// Session parameters for fetching from `url` under `options`.
pub fn connect_params(url: &Url, proxy: Option<&Proxy>, options: &FetchOptions) -> ConnectParams {
    let mut p = ConnectParams::from_url(url);
    p.proxy = proxy.cloned();
    p.features = options.features.clone();
    p.transfer_timeout = Duration::from_secs(options.transfer_timeout.max(1));
    p.block_size = options.block_size.max(1024);
    p.user_agent = options.user_agent.clone();
    p
}

/// Key prefix S3 puts in front of every name listed under `dir` (`bucket/a/b` gives `a/b/`).
pub fn s3_key_prefix(dir: &str) -> Option<String> {
    let prefix = split_bucket(dir).1.trim_matches('/');
    (!prefix.is_empty()).then(|| format!("{}/", prefix))
}

impl FetchJob {
    pub fn connect_params(&self) -> ConnectParams {
        connect_params(&self.url, self.proxy.as_ref(), &self.options)
    }

    /// Remote directory, plus the file name when the URL names a single file.
    pub fn remote_target(&self) -> (String, Option<String>) {
        let path = self.url.path.clone().unwrap_or_default();
        if !self.options.dont_get_dir_list {
            return (path, None);
        }
        let trimmed = path.trim_end_matches('/');
        match trimmed.rsplit_once('/') {
            Some((d, f)) => (d.to_string(), Some(f.to_string())),
            None => (String::new(), Some(trimmed.to_string())),
        }
    }
}

/// The scheduler side of a worker.
pub trait Coordinator {
    /// Another job for the endpoint of `params`, to run on the live session.
    fn next_burst_job(&mut self, _params: &ConnectParams) -> Option<FetchJob> {
        None
    }

    /// More files are waiting than this worker takes; start helpers for them.
    fn request_helpers(&mut self, _job: &FetchJob, _remaining: usize) {}

    /// Host name currently configured for the job, when known.
    fn current_hostname(&self, _job: &FetchJob) -> Option<String> {
        None
    }

    fn database_changed(&self) -> bool {
        false
    }
}

/// Coordinator of a stand-alone worker: no bursts, no helpers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCoordinator;

impl Coordinator for NullCoordinator {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Entries seen in listings.
    pub listed: usize,
    pub files: u32,
    pub bytes: u64,
    /// Entries marked retrieved without a download (filters, 204/304, missing).
    pub skipped: u32,
    pub bursts: u32,
    pub retries: u32,
}

#[derive(Debug, Clone)]
struct PendingRename {
    from: PathBuf,
    to: PathBuf,
}

fn append(log: &Option<AuditLog>, record: &AuditRecord) -> Result<()> {
    match log {
        Some(l) => l.append(record),
        None => Ok(()),
    }
}

/// Drop a partial download that will not be completed.
async fn remove_partial(tmp: &Path) {
    if let Err(e) = tokio::fs::remove_file(tmp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(file = %tmp.display(), error = %e, "could not remove partial download");
        }
    }
}

fn record(job: &FetchJob, kind: RecordKind, name: &str, size: u64) -> AuditRecord {
    let mut r = AuditRecord::new(kind, name, size, job.job_id);
    r.unique_prefix = job.unique_prefix.clone();
    r
}

fn is_dot_file(name: &str) -> bool {
    name.rsplit('/').next().is_some_and(|b| b.starts_with('.'))
}

/// Merge a whole listing into the list. Caller holds the list lock.
fn merge_locked(list: &mut RetrieveList, entries: &[ListEntry], opts: &FetchOptions) -> Result<()> {
    list.begin_scan()?;
    for e in entries {
        if !opts.accept_dot_files && is_dot_file(&e.name) {
            continue;
        }
        list.merge(e, opts.stupid_mode)?;
    }
    if !list.is_private() {
        list.compact()?;
    }
    Ok(())
}

pub struct Fetcher<C: Coordinator> {
    job: FetchJob,
    coordinator: C,
    session: Option<HttpSession>,
    list: Option<RetrieveList>,
    limiter: RateLimiter,
    output_log: Option<AuditLog>,
    delete_log: Option<AuditLog>,
    rename_pending: Option<PendingRename>,
    stats: FetchStats,
    no_name_counter: u32,
    finished: bool,
}

impl<C: Coordinator> Fetcher<C> {
    pub fn new(job: FetchJob, coordinator: C) -> Fetcher<C> {
        Fetcher {
            limiter: RateLimiter::new(job.options.rate_limit),
            job,
            coordinator,
            session: None,
            list: None,
            output_log: None,
            delete_log: None,
            rename_pending: None,
            stats: FetchStats::default(),
            no_name_counter: 0,
            finished: false,
        }
    }

    pub fn with_output_log(mut self, log: AuditLog) -> Self {
        self.output_log = Some(log);
        self
    }

    pub fn with_delete_log(mut self, log: AuditLog) -> Self {
        self.delete_log = Some(log);
        self
    }

    /// Start with an already connected session (e.g. handed over from another job).
    pub fn with_session(mut self, session: HttpSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn job(&self) -> &FetchJob {
        &self.job
    }

    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    pub fn retrieve_list(&self) -> Option<&RetrieveList> {
        self.list.as_ref()
    }

    /// Fetch until the job (and every burst job after it) is done, then run the exit
    /// housekeeping.
    pub async fn run(&mut self) -> Result<FetchStats> {
        let result = self.run_loop().await;
        if let Err(e) = &result {
            let reply = self.session.as_ref().and_then(|s| s.last_reply()).map(str::to_string);
            if e.is_clean_exit() {
                tracing::info!(job_id = self.job.job_id, reason = %e, "leaving");
            } else {
                tracing::error!(job_id = self.job.job_id, error = %e, reply = ?reply, "fetch failed");
            }
        }
        let finished = self.finish().await;
        result?;
        finished?;
        Ok(self.stats.clone())
    }

    async fn run_loop(&mut self) -> Result<()> {
        let started = Instant::now();
        loop {
            self.scan().await?;
            let params = self.job.connect_params();
            if let Some(next) = self.coordinator.next_burst_job(&params) {
                self.start_burst(next).await?;
                continue;
            }
            let keep = Duration::from_secs(self.job.options.keep_connected);
            let left = keep.saturating_sub(started.elapsed());
            if left.is_zero() {
                return Ok(());
            }
            self.check_disconnect().await;
            tokio::time::sleep(KEEP_CONNECTED_POLL.min(left)).await;
        }
    }

    /// Close a connection that outlived `disconnect`; the next scan reconnects.
    async fn check_disconnect(&mut self) {
        let limit = self.job.options.disconnect;
        if limit == 0 {
            return;
        }
        let expired = self
            .session
            .as_ref()
            .is_some_and(|s| s.connected_at().elapsed() >= Duration::from_secs(limit));
        if expired {
            if let Some(mut s) = self.session.take() {
                tracing::debug!(host = %self.job.url.hostname, "disconnect interval reached");
                s.quit().await;
            }
        }
    }

    async fn start_burst(&mut self, next: FetchJob) -> Result<()> {
        let params = next.connect_params();
        if let Some(session) = self.session.as_mut() {
            if session.can_burst(&params) {
                session.burst(params).await?;
            } else {
                tracing::info!(host = %params.host, "next job is for another endpoint, reconnecting");
                session.quit().await;
                self.session = None;
            }
        }
        if next.alias != self.job.alias || next.list_dir != self.job.list_dir || next.worker_id != self.job.worker_id {
            if let Some(list) = self.list.take() {
                list.detach()?;
            }
        }
        self.job = next;
        self.limiter.set_limit(self.job.options.rate_limit);
        self.stats.bursts += 1;
        tracing::info!(job_id = self.job.job_id, dir = %self.job.alias, bursts = self.stats.bursts, "burst");
        Ok(())
    }

    async fn ensure_session(&mut self) -> Result<()> {
        if self.session.is_none() {
            let params = self.job.connect_params();
            tracing::debug!(host = %params.host, port = params.port, tls = params.tls, "connecting");
            self.session = Some(HttpSession::connect(params).await?);
        }
        Ok(())
    }

    fn ensure_list(&mut self) -> Result<()> {
        if self.list.is_none() {
            self.list = Some(RetrieveList::attach(
                &self.job.list_dir,
                &self.job.alias,
                self.job.options.private_list(),
                self.job.worker_id,
            )?);
        }
        Ok(())
    }

    fn list_mut(&mut self) -> Result<&mut RetrieveList> {
        self.list
            .as_mut()
            .ok_or_else(|| Error::LockConflict("retrieve list not attached".to_string()))
    }

    /// One pass over the directory.
    async fn scan(&mut self) -> Result<()> {
        if let Some(host) = self.coordinator.current_hostname(&self.job) {
            if !host.eq_ignore_ascii_case(&self.job.url.hostname) {
                return Err(Error::HostnameChanged);
            }
        }
        if self.coordinator.database_changed() {
            return Err(Error::DatabaseChanged);
        }
        self.ensure_session().await?;
        self.ensure_list()?;

        let entries = self.list_remote().await?;
        self.stats.listed += entries.len();
        tracing::debug!(dir = %self.job.alias, entries = entries.len(), "listing parsed");

        let opts = self.job.options.clone();
        let list = self.list_mut()?;
        list.lock_exclusive(Region::List)?;
        let merged = merge_locked(list, &entries, &opts);
        list.unlock(Region::List)?;
        merged?;

        self.list_mut()?.lock_shared(Region::List)?;
        let assigned = self.assign().await;
        self.list_mut()?.unlock(Region::List)?;
        let todo = assigned?;

        for name in todo {
            self.fetch_with_retries(&name).await?;
        }
        Ok(())
    }

    /// Listing tuples of the job's directory (all pages), or the single file of a direct URL.
    async fn list_remote(&mut self) -> Result<Vec<ListEntry>> {
        let (dir, file) = self.job.remote_target();
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        if let Some(file) = file {
            let mut e = ListEntry::named(file.clone());
            match session.head(&dir, &file).await? {
                HeadOutcome::Found(info) => {
                    e.size = info.size;
                    e.size_is_authoritative = info.size.is_some();
                    e.mtime = info.mtime;
                    if info.mtime.is_some() {
                        e.date_precision = DatePrecision::Second;
                    }
                    e.etag = info.etag.map(|t| t.value);
                }
                HeadOutcome::Status(code) => {
                    tracing::debug!(file = %file, status = code, "HEAD on direct URL failed");
                }
            }
            return Ok(vec![e]);
        }

        let opts = &self.job.options;
        let req = ListingRequest {
            version: opts.list_version,
            max_dir_buffer: opts.max_dir_buffer,
            no_delimiter: opts.no_delimiter,
            keep_path: opts.keep_path,
        };
        let s3_prefix = (session.params().service == Service::S3)
            .then(|| s3_key_prefix(&dir))
            .flatten();
        let parse_opts = ListingOptions {
            version: opts.list_version,
            href_search_only: opts.href_search_only,
            base: Some(&self.job.url),
            s3_prefix: s3_prefix.as_deref(),
            now: chrono::Utc::now().timestamp(),
        };
        session.set_marker(None);
        let mut all = Vec::new();
        loop {
            let body = session.get_listing(&dir, &req).await?;
            let (entries, summary) = listing::parse_all(&body, &parse_opts)?;
            all.extend(entries);
            if summary.complete {
                break;
            }
            tracing::debug!(dir = %dir, marker = ?summary.marker, "listing truncated, next page");
            session.set_marker(summary.marker);
        }
        session.set_marker(None);
        Ok(all)
    }

    /// Take the entries this worker will fetch. Caller holds the shared list lock.
    async fn assign(&mut self) -> Result<Vec<String>> {
        let opts = &self.job.options;
        let list = self
            .list
            .as_mut()
            .ok_or_else(|| Error::LockConflict("retrieve list not attached".to_string()))?;
        let (dir, _) = self.job.remote_target();
        let now = chrono::Utc::now().timestamp();
        let owner = list.worker_id() + 1;
        let scan_only = opts.one_process_just_scanning && self.job.worker_id == 0;
        let filtered = opts.ignore_size.is_some() || opts.ignore_file_time.is_some();
        let mut todo = Vec::new();
        let mut files = 0u32;
        let mut bytes = 0u64;
        let mut remaining = 0usize;

        // By name: a reload after another worker's compaction reorders the table.
        let names: Vec<String> = list.entries().iter().map(|e| e.name.clone()).collect();
        for name in names {
            let Some(e) = list.find(&name).and_then(|i| list.get(i)) else {
                continue;
            };
            if e.retrieved || !e.in_list || (e.assigned != 0 && e.assigned != owner) {
                continue;
            }
            if filtered && !e.has_exact_size_date() {
                if let Some(session) = self.session.as_mut() {
                    match session.head(&dir, &name).await? {
                        HeadOutcome::Found(info) => list.set_exact(&name, info.size, info.mtime)?,
                        HeadOutcome::Status(code) => {
                            tracing::debug!(file = %name, status = code, "HEAD refresh failed, using listed values");
                        }
                    }
                }
            }
            let Some(e) = list.find(&name).and_then(|i| list.get(i)) else {
                continue;
            };
            let (size, mtime) = (e.size, e.mtime);
            if let Some(f) = opts.ignore_size.filter(|f| size >= 0 && f.ignores(size as u64)) {
                tracing::debug!(file = %name, size, filter = %String::from(f), "ignored by size");
                list.mark_retrieved(&name)?;
                append(&self.delete_log, &record(&self.job, RecordKind::IgnoredSize, &name, size.max(0) as u64))?;
                self.stats.skipped += 1;
                continue;
            }
            if let Some(f) = opts.ignore_file_time.filter(|f| mtime >= 0 && f.ignores(mtime, now)) {
                tracing::debug!(file = %name, mtime, filter = %String::from(f), "ignored by age");
                list.mark_retrieved(&name)?;
                append(&self.delete_log, &record(&self.job, RecordKind::IgnoredAge, &name, size.max(0) as u64))?;
                self.stats.skipped += 1;
                continue;
            }
            let size = size.max(0) as u64;
            let over_count = opts.max_copied_files > 0 && files >= opts.max_copied_files;
            let over_bytes = opts.max_copied_file_size > 0 && files > 0 && bytes + size > opts.max_copied_file_size;
            if scan_only || over_count || over_bytes {
                remaining += 1;
                continue;
            }
            if list.try_assign(&name)? == Assign::Assigned {
                todo.push(name);
                files += 1;
                bytes += size;
            }
        }
        if remaining > 0 {
            tracing::info!(dir = %self.job.alias, remaining, "more files in list than this worker takes");
            if !opts.do_not_parallelise {
                self.coordinator.request_helpers(&self.job, remaining);
            }
        }
        Ok(todo)
    }

    async fn fetch_with_retries(&mut self, name: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            let r = match self.ensure_session().await {
                Ok(()) => self.fetch_entry(name, attempt).await,
                Err(e) => Err(e),
            };
            match r {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.job.options.retries => {
                    attempt += 1;
                    self.stats.retries += 1;
                    tracing::warn!(job_id = self.job.job_id, error = %e, attempt, "transfer failed, retrying");
                    if !matches!(e, Error::ConnectionReopened) {
                        if let Some(mut s) = self.session.take() {
                            s.quit().await;
                        }
                    }
                }
                Err(e) => {
                    if let Some(list) = self.list.as_mut() {
                        if let Err(release) = list.release(name) {
                            tracing::warn!(error = %release, "could not release entry");
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Download one assigned entry into its temp file, then rename it into place.
    async fn fetch_entry(&mut self, name: &str, retries: u32) -> Result<()> {
        let entry = self
            .list
            .as_ref()
            .and_then(|l| l.find(name).and_then(|i| l.get(i)))
            .cloned()
            .ok_or_else(|| Error::LockConflict(format!("retrieve list entry {} vanished", name)))?;
        let opts = self.job.options.clone();
        let (dir, _) = self.job.remote_target();
        let tmp = self.job.local_dir.join(temp_name(&entry.name));
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        let list = self
            .list
            .as_mut()
            .ok_or_else(|| Error::LockConflict("retrieve list not attached".to_string()))?;

        let append_only = opts.stupid_mode == StupidMode::AppendOnly && entry.prev_size > 0;
        let mut offset = 0u64;
        let mut already_complete = false;
        if append_only {
            offset = entry.prev_size as u64;
        } else if let Ok(md) = tokio::fs::metadata(&tmp).await {
            let have = md.len();
            let mut expected = (entry.size >= 0).then_some(entry.size as u64);
            if have > 0 && !entry.has_exact_size_date() {
                if let HeadOutcome::Found(info) = session.head(&dir, &entry.name).await? {
                    if info.size.is_some() {
                        expected = info.size;
                        list.set_exact(name, info.size, info.mtime)?;
                    }
                }
            }
            match expected {
                Some(size) if have > 0 && size > have => offset = have,
                Some(size) if have > 0 && size == have => already_complete = true,
                _ => {}
            }
            if offset > 0 {
                tracing::info!(file = %entry.name, offset, "resuming partial download");
            }
        }

        let started = Instant::now();
        let mut bytes_done = 0u64;
        let mut disposition = None;
        let mut total = tokio::fs::metadata(&tmp).await.map(|m| m.len()).unwrap_or(0);
        if !already_complete {
            match session.get(&dir, &entry.name, offset).await? {
                GetOutcome::Body(info) => {
                    let resume = offset > 0 && info.partial && !append_only;
                    disposition = info.filename.clone();
                    let opened = if resume {
                        tokio::fs::OpenOptions::new().append(true).open(&tmp).await
                    } else {
                        tokio::fs::File::create(&tmp).await
                    };
                    let mut file = opened.map_err(|e| Error::local("open", &tmp, e))?;
                    let mut buf = vec![0u8; opts.block_size.max(1024)];
                    loop {
                        let n = session.read(&mut buf).await?;
                        if n == 0 {
                            break;
                        }
                        self.limiter.acquire(n as u64).await;
                        file.write_all(&buf[..n])
                            .await
                            .map_err(|e| Error::local("write", &tmp, e))?;
                        bytes_done += n as u64;
                    }
                    file.flush().await.map_err(|e| Error::local("write", &tmp, e))?;
                    drop(file);
                    if let Some(cl) = info.content_length {
                        if bytes_done != cl {
                            return Err(Error::ConnectionReset);
                        }
                    }
                    total = if resume { offset + bytes_done } else { bytes_done };
                }
                GetOutcome::NothingToFetch => {
                    tracing::debug!(file = %entry.name, "nothing to fetch");
                    remove_partial(&tmp).await;
                    list.mark_retrieved(name)?;
                    self.stats.skipped += 1;
                    return Ok(());
                }
                GetOutcome::Status(code @ (301 | 400 | 404)) => {
                    tracing::warn!(file = %entry.name, status = code, reply = ?session.last_reply(), "remote file not available");
                    remove_partial(&tmp).await;
                    if code == 404 {
                        list.mark_gone(name)?;
                        append(&self.delete_log, &record(&self.job, RecordKind::Gone, &entry.name, 0))?;
                    } else {
                        list.mark_retrieved(name)?;
                    }
                    self.stats.skipped += 1;
                    return Ok(());
                }
                GetOutcome::Status(code) => {
                    return Err(Error::UnexpectedStatus {
                        code,
                        reply: session.last_reply().map(str::to_string),
                    })
                }
            }
        }

        if opts.remove == RemoveMode::Yes {
            match session.del(&dir, &entry.name).await {
                Ok(()) => append(
                    &self.delete_log,
                    &record(&self.job, RecordKind::RemovedRemote, &entry.name, total),
                )?,
                Err(e) if opts.stupid_mode == StupidMode::Yes => return Err(e),
                Err(e) => tracing::warn!(file = %entry.name, error = %e, "could not delete remote file"),
            }
        }
        list.mark_retrieved(name)?;

        let named = if opts.url_creates_file_name {
            disposition.as_deref().and_then(disposition_name)
        } else {
            final_name(&entry.name, opts.keep_path)
        };
        let final_local = match named {
            Some(n) => n,
            None => {
                self.no_name_counter += 1;
                no_name(self.job.worker_id, self.no_name_counter)
            }
        };
        let to = self.job.local_dir.join(&final_local);
        self.rename_pending = Some(PendingRename {
            from: tmp.clone(),
            to: to.clone(),
        });
        tokio::fs::rename(&tmp, &to).await.map_err(|e| Error::RenameFailed {
            from: tmp.clone(),
            to: to.clone(),
            source: e,
        })?;
        self.rename_pending = None;

        self.stats.files += 1;
        self.stats.bytes += bytes_done;
        let mut rec = record(&self.job, RecordKind::Received, &final_local, total);
        rec.remote_name = Some(entry.name.clone());
        rec.retries = retries;
        rec.unique_number = self.stats.files;
        rec.transfer_ticks = ticks(started.elapsed());
        append(&self.output_log, &rec)?;
        tracing::info!(file = %final_local, bytes = total, offset, "retrieved");
        Ok(())
    }

    fn replay_rename(&mut self) {
        if let Some(p) = self.rename_pending.take() {
            if p.from.exists() {
                match std::fs::rename(&p.from, &p.to) {
                    Ok(()) => tracing::info!(from = %p.from.display(), to = %p.to.display(), "completed interrupted rename"),
                    Err(e) => tracing::error!(from = %p.from.display(), to = %p.to.display(), error = %e, "rename failed again"),
                }
            }
        }
    }

    fn housekeeping(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.replay_rename();
        let detached = match self.list.take() {
            Some(list) => list.detach(),
            None => Ok(()),
        };
        let burst = if self.stats.bursts > 0 {
            format!(" [BURST * {}]", self.stats.bursts)
        } else {
            String::new()
        };
        tracing::info!(
            job_id = self.job.job_id,
            files = self.stats.files,
            bytes = self.stats.bytes,
            "{} files fetched ({} bytes){}",
            self.stats.files,
            self.stats.bytes,
            burst
        );
        detached
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut s) = self.session.take() {
            s.quit().await;
        }
        self.housekeeping()
    }

    /// Hand the live session to the caller instead of closing it (the exit housekeeping still
    /// runs).
    pub fn take_session(&mut self) -> Option<HttpSession> {
        self.session.take()
    }
}

impl<C: Coordinator> Drop for Fetcher<C> {
    fn drop(&mut self) {
        if let Err(e) = self.housekeeping() {
            tracing::error!(error = %e, "exit housekeeping failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(path: &str, dont_get_dir_list: bool) -> FetchJob {
        let mut options = FetchOptions::default();
        options.dont_get_dir_list = dont_get_dir_list;
        FetchJob {
            job_id: 1,
            alias: "obs".into(),
            url: Url {
                hostname: "h".into(),
                path: Some(path.into()),
                ..Url::default()
            },
            proxy: None,
            options,
            local_dir: PathBuf::from("/tmp"),
            list_dir: PathBuf::from("/tmp"),
            worker_id: 0,
            unique_prefix: String::new(),
        }
    }

    #[test]
    fn remote_target_of_direct_url() {
        assert_eq!(job("pub/obs/", false).remote_target(), ("pub/obs/".to_string(), None));
        assert_eq!(
            job("pub/obs/x.grib", true).remote_target(),
            ("pub/obs".to_string(), Some("x.grib".to_string()))
        );
        assert_eq!(job("x.grib", true).remote_target(), (String::new(), Some("x.grib".to_string())));
    }

    #[test]
    fn s3_prefixes() {
        assert_eq!(s3_key_prefix("bucket/p/").as_deref(), Some("p/"));
        assert_eq!(s3_key_prefix("/bucket/a/b"), Some("a/b/".to_string()));
        assert_eq!(s3_key_prefix("bucket"), None);
    }

    #[test]
    fn dot_files() {
        assert!(is_dot_file(".hidden"));
        assert!(is_dot_file("sub/.hidden"));
        assert!(!is_dot_file("visible.txt"));
    }

    #[test]
    fn connect_params_follow_options() {
        let mut j = job("p", false);
        j.options.transfer_timeout = 7;
        j.options.block_size = 10;
        let p = j.connect_params();
        assert_eq!(p.transfer_timeout, Duration::from_secs(7));
        assert_eq!(p.block_size, 1024);
    }

    #[tokio::test]
    async fn partial_download_removal_tolerates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(temp_name("obs.grib"));
        std::fs::write(&tmp, b"par").unwrap();
        remove_partial(&tmp).await;
        assert!(!tmp.exists());
        remove_partial(&tmp).await;
        let busy = dir.path().join("busy");
        std::fs::create_dir(&busy).unwrap();
        remove_partial(&busy).await;
        assert!(busy.is_dir());
    }
}
