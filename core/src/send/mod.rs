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

//! Sender: PUT local files to an HTTP server, then archive or unlink them.

mod bulletin;
mod pmatch;

pub use bulletin::{header_from_name, BulletinType, Framing, PREFIX_LEN, TRAILER};
pub use pmatch::{pmatch, rename};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::audit::{ticks, AuditLog, AuditRecord, RecordKind};
use crate::config::SendOptions;
use crate::counter::Counter;
use crate::error::{Error, Result};
use crate::protocol::http::{ConnectParams, HttpSession, Proxy, PutReply, PutStart};
use crate::rate::RateLimiter;
use crate::url::Url;

/// Decides whether a file was sent before.
pub trait DupCheck {
    fn is_duplicate(&mut self, name: &str, size: u64) -> Result<bool>;

    /// The file was delivered.
    fn record(&mut self, name: &str, size: u64) -> Result<()>;
}

/// Remembers name and size of everything delivered during this process.
#[derive(Debug, Default)]
pub struct SeenFiles {
    seen: HashSet<(String, u64)>,
}

impl DupCheck for SeenFiles {
    fn is_duplicate(&mut self, name: &str, size: u64) -> Result<bool> {
        Ok(self.seen.contains(&(name.to_string(), size)))
    }

    fn record(&mut self, name: &str, size: u64) -> Result<()> {
        self.seen.insert((name.to_string(), size));
        Ok(())
    }
}

/// One batch of local files for one destination.
#[derive(Debug, Clone)]
pub struct SendJob {
    pub job_id: u32,
    pub url: Url,
    pub proxy: Option<Proxy>,
    pub options: SendOptions,
    pub files: Vec<PathBuf>,
    pub unique_prefix: String,
}

impl SendJob {
    pub fn connect_params(&self) -> ConnectParams {
        let mut p = ConnectParams::from_url(&self.url);
        p.proxy = self.proxy.clone();
        p.features = self.options.features.clone();
        p.transfer_timeout = Duration::from_secs(self.options.transfer_timeout.max(1));
        p.block_size = self.options.block_size.max(1024);
        p.user_agent = self.options.user_agent.clone();
        p
    }

    fn remote_dir(&self) -> String {
        self.url.path.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendStats {
    pub files: u32,
    pub bytes: u64,
    pub duplicates: u32,
    pub retries: u32,
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::local(
                "name",
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "no usable file name"),
            )
        })
}

/// Archive subdirectory for `now`: `<host>/<job_id>/<bucket start>`.
pub fn archive_subdir(host: &str, job_id: u32, now: u64, archive_time: u64) -> PathBuf {
    let bucket = now - now % archive_time.max(1);
    PathBuf::from(host).join(job_id.to_string()).join(bucket.to_string())
}

pub struct Sender<D: DupCheck> {
    job: SendJob,
    dup: D,
    session: Option<HttpSession>,
    limiter: RateLimiter,
    output_log: Option<AuditLog>,
    counter: Option<Counter>,
    stats: SendStats,
    first_in_burst: bool,
    /// Sending the job's last file; its requests close the connection.
    last_file: bool,
}

impl<D: DupCheck> Sender<D> {
    pub fn new(job: SendJob, dup: D) -> Result<Sender<D>> {
        let counter = match (&job.options.wmo_counter_file, job.options.add_wmo_counter) {
            (Some(path), true) => Some(Counter::wmo(path)),
            (None, true) => return Err(Error::Config("add_wmo_counter needs wmo_counter_file".to_string())),
            _ => None,
        };
        Ok(Sender {
            limiter: RateLimiter::new(job.options.rate_limit),
            job,
            dup,
            session: None,
            output_log: None,
            counter,
            stats: SendStats::default(),
            first_in_burst: true,
            last_file: false,
        })
    }

    pub fn with_output_log(mut self, log: AuditLog) -> Self {
        self.output_log = Some(log);
        self
    }

    pub fn with_session(mut self, session: HttpSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn stats(&self) -> &SendStats {
        &self.stats
    }

    /// Send every file of the job in order. Stops at the first file that fails after its
    /// retries; the files not yet sent stay where they are.
    pub async fn run(&mut self) -> Result<SendStats> {
        let files = self.job.files.clone();
        let mut result = Ok(());
        for (i, path) in files.iter().enumerate() {
            self.last_file = i + 1 == files.len();
            result = self.send_one(path).await;
            if let Err(e) = &result {
                let reply = self.session.as_ref().and_then(|s| s.last_reply()).map(str::to_string);
                tracing::error!(job_id = self.job.job_id, file = %path.display(), error = %e, reply = ?reply, "send failed");
                break;
            }
        }
        if let Some(mut s) = self.session.take() {
            s.quit().await;
        }
        tracing::info!(
            job_id = self.job.job_id,
            files = self.stats.files,
            bytes = self.stats.bytes,
            "{} files sent ({} bytes)",
            self.stats.files,
            self.stats.bytes
        );
        result.map(|()| self.stats.clone())
    }

    /// Duplicate check and bulletin framing happen once per file; only the transfer itself
    /// is retried, so a retry neither sees its own file as a duplicate nor takes a new counter.
    async fn send_one(&mut self, path: &Path) -> Result<()> {
        let name = file_name(path)?;
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::local("stat", path, e))?
            .len();
        let dup_check = self.job.options.dup_check;
        if dup_check && self.dup.is_duplicate(&name, size)? {
            tracing::info!(file = %name, size, "duplicate, not sent");
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| Error::local("unlink", path, e))?;
            self.stats.duplicates += 1;
            let mut rec = AuditRecord::new(RecordKind::Duplicate, name.as_str(), size, self.job.job_id);
            rec.unique_prefix = self.job.unique_prefix.clone();
            return append(&self.output_log, &rec);
        }

        let framed = if self.job.options.file_name_is_header {
            Some(self.frame(path, &name, size).await?)
        } else {
            None
        };
        let body = framed.clone().unwrap_or_else(|| path.to_path_buf());
        let sent = self.send_with_retries(path, &body, &name).await;
        if let Some(f) = &framed {
            if let Err(e) = tokio::fs::remove_file(f).await {
                tracing::warn!(file = %f.display(), error = %e, "could not remove framed copy");
            }
        }
        sent?;
        if dup_check {
            self.dup.record(&name, size)?;
        }
        Ok(())
    }

    async fn send_with_retries(&mut self, path: &Path, body: &Path, name: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            if self.session.is_none() {
                match HttpSession::connect(self.job.connect_params()).await {
                    Ok(s) => {
                        self.session = Some(s);
                        self.first_in_burst = true;
                    }
                    Err(e) if e.is_retryable() && attempt < self.job.options.retries => {
                        attempt += 1;
                        self.stats.retries += 1;
                        tracing::warn!(host = %self.job.url.hostname, error = %e, attempt, "connect failed, retrying");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            if let Some(s) = self.session.as_mut() {
                s.set_closing(self.last_file);
            }
            match self.send_file(path, body, name, attempt).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.job.options.retries => {
                    attempt += 1;
                    self.stats.retries += 1;
                    tracing::warn!(file = %path.display(), error = %e, attempt, "transfer failed, retrying");
                    if !matches!(e, Error::ConnectionReopened) {
                        if let Some(mut s) = self.session.take() {
                            s.quit().await;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// PUT `body` for the local file `path`, then archive or unlink `path`.
    async fn send_file(&mut self, path: &Path, body: &Path, name: &str, retries: u32) -> Result<()> {
        let remote = rename(&self.job.options.trans_rename_rules, name).unwrap_or_else(|| name.to_string());
        let started = Instant::now();
        let sent = self.put(body, &remote).await?;

        let (kind, archive_path) = self.archive_or_unlink(path, name).await?;
        self.stats.files += 1;
        self.stats.bytes += sent;
        let mut rec = AuditRecord::new(kind, name, sent, self.job.job_id);
        rec.unique_prefix = self.job.unique_prefix.clone();
        rec.remote_name = Some(remote.clone());
        rec.retries = retries;
        rec.unique_number = self.stats.files;
        rec.transfer_ticks = ticks(started.elapsed());
        rec.archive_path = archive_path;
        append(&self.output_log, &rec)?;
        tracing::info!(file = %name, remote = %remote, bytes = sent, "sent");
        Ok(())
    }

    /// Write the framed bulletin next to the source as a dot file and return its path.
    async fn frame(&mut self, path: &Path, name: &str, size: u64) -> Result<PathBuf> {
        let header = header_from_name(name).ok_or_else(|| Error::Config(format!("`{}` has no bulletin header", name)))?;
        let mut src = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::local("open", path, e))?;
        let mut first = vec![0u8; 512];
        let n = src.read(&mut first).await.map_err(|e| Error::local("read", path, e))?;
        first.truncate(n);
        let counter = match &self.counter {
            Some(c) => Some(c.next()?),
            None => None,
        };
        let framing = Framing::new(&header, counter, size, BulletinType::sniff(&first))?;

        let out_path = path.with_file_name(format!(".{}.bulletin", name));
        let mut out = tokio::fs::File::create(&out_path)
            .await
            .map_err(|e| Error::local("create", &out_path, e))?;
        let write = async {
            out.write_all(&framing.prefix).await?;
            out.write_all(&first).await?;
            tokio::io::copy(&mut src, &mut out).await?;
            out.write_all(&framing.trailer).await?;
            out.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        write.await.map_err(|e| Error::local("write", &out_path, e))?;
        tracing::debug!(file = %name, header = %header, counter = ?counter, "bulletin framed");
        Ok(out_path)
    }

    /// PUT `body` as `remote`; returns the bytes sent.
    async fn put(&mut self, body: &Path, remote: &str) -> Result<u64> {
        let dir = self.job.remote_dir();
        let size = tokio::fs::metadata(body)
            .await
            .map_err(|e| Error::local("stat", body, e))?
            .len();
        let block = self.job.options.block_size.max(1024);
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        let mut auth_retried = false;
        loop {
            match session.put(&dir, remote, body, size, self.first_in_burst).await? {
                PutStart::Ready => {}
                PutStart::Status(code) => {
                    return Err(Error::UnexpectedStatus {
                        code,
                        reply: session.last_reply().map(str::to_string),
                    })
                }
            }
            self.first_in_burst = false;
            let mut file = tokio::fs::File::open(body)
                .await
                .map_err(|e| Error::local("open", body, e))?;
            let mut buf = vec![0u8; block];
            loop {
                let n = file.read(&mut buf).await.map_err(|e| Error::local("read", body, e))?;
                if n == 0 {
                    break;
                }
                self.limiter.acquire(n as u64).await;
                session.write(&buf[..n]).await?;
            }
            match session.put_response().await? {
                PutReply::Done { status, etag } => {
                    tracing::debug!(file = %remote, status, etag = ?etag.map(|t| t.value), "stored");
                    return Ok(size);
                }
                PutReply::AuthRequired if !auth_retried => auth_retried = true,
                PutReply::AuthRequired => return Err(Error::AuthRejected(401)),
                PutReply::Status(code) => {
                    return Err(Error::UnexpectedStatus {
                        code,
                        reply: session.last_reply().map(str::to_string),
                    })
                }
            }
        }
    }

    async fn archive_or_unlink(&self, path: &Path, name: &str) -> Result<(RecordKind, Option<String>)> {
        let opts = &self.job.options;
        match &opts.archive_dir {
            Some(root) if opts.archive_time > 0 => {
                let now = chrono::Utc::now().timestamp().max(0) as u64;
                let sub = archive_subdir(&self.job.url.hostname, self.job.job_id, now, opts.archive_time);
                let dir = root.join(&sub);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| Error::local("mkdir", &dir, e))?;
                let to = dir.join(name);
                tokio::fs::rename(path, &to).await.map_err(|e| Error::RenameFailed {
                    from: path.to_path_buf(),
                    to: to.clone(),
                    source: e,
                })?;
                Ok((RecordKind::Archived, Some(sub.join(name).to_string_lossy().into_owned())))
            }
            _ => {
                tokio::fs::remove_file(path)
                    .await
                    .map_err(|e| Error::local("unlink", path, e))?;
                Ok((RecordKind::Sent, None))
            }
        }
    }
}

fn append(log: &Option<AuditLog>, record: &AuditRecord) -> Result<()> {
    match log {
        Some(l) => l.append(record),
        None => Ok(()),
    }
}
