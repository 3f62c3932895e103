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

//! Directory listing extraction: turns a fetched listing document into `{name, size, mtime}`
//! tuples.
//!
//! The dialect is chosen by discriminators tried in a fixed order (`<h1>` + pre-formatted
//! block, Apache `<PRE>`, S3 XML, `downloadLinkArea` and `contentDiv` divs, `<table>`,
//! `<pre>` or bare anchors, `<ul>`), falling back to harvesting every `href`. Entries are
//! pushed to a [`ListingHandler`] as they are found; a malformed row stops the parse with an
//! error while rows already delivered stay valid.

mod date;
mod entities;
mod html;
mod s3;
mod size;

pub use date::{parse_date, DatePrecision};
pub use entities::{decode_entities, strip_tags};
pub use size::{parse_size, ParsedSize};

use crate::config::{limits, ListVersion};
use crate::error::{Error, Result};
use crate::url::Url;

/// One remote file found in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListEntry {
    pub name: String,
    pub size: Option<u64>,
    /// The size is an exact byte count.
    pub size_is_authoritative: bool,
    /// The size was scaled from a K/M/G/... unit.
    pub size_unit_was_applied: bool,
    pub mtime: Option<i64>,
    pub date_precision: DatePrecision,
    pub etag: Option<String>,
}

impl ListEntry {
    pub fn named(name: impl Into<String>) -> ListEntry {
        ListEntry {
            name: name.into(),
            ..ListEntry::default()
        }
    }

    fn apply_size(&mut self, size: Option<ParsedSize>) {
        if let Some(s) = size {
            self.size = Some(s.bytes);
            self.size_is_authoritative = s.authoritative;
            self.size_unit_was_applied = s.unit_applied;
        }
    }

    /// Both size and date are exact; no HEAD is needed to trust them.
    pub fn is_exact(&self) -> bool {
        self.size_is_authoritative && self.date_precision == DatePrecision::Second
    }
}

/// Listing format, by the discriminator that selected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `<h1>` followed by a pre-formatted block (NOAA, Apache, nginx).
    H1Pre,
    /// Apache classic `<PRE>` with an `<HR>` rule.
    ApachePre,
    /// S3 `ListBucketResult`, version 1 or 2.
    S3,
    /// `<div id="downloadLinkArea">`; hrefs keep their full path.
    DownloadLinkArea,
    /// `<div id="contentDiv">`; relative hrefs.
    ContentDiv,
    /// `<table>` rows (Apache 2.4 fancy index, lighttpd).
    Table,
    /// `<pre>` or bare anchors.
    MinimalPre,
    /// `<ul>` name lists.
    List,
    /// Any `href` not naming a directory.
    HrefList,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::H1Pre => "h1-pre",
            Dialect::ApachePre => "apache-pre",
            Dialect::S3 => "s3",
            Dialect::DownloadLinkArea => "download-link-area",
            Dialect::ContentDiv => "content-div",
            Dialect::Table => "table",
            Dialect::MinimalPre => "pre",
            Dialect::List => "ul",
            Dialect::HrefList => "href-list",
        }
    }
}

/// Receives entries as the parser finds them.
pub trait ListingHandler {
    fn entry(&mut self, entry: ListEntry) -> Result<()>;
}

impl<F> ListingHandler for F
where
    F: FnMut(ListEntry) -> Result<()>,
{
    fn entry(&mut self, entry: ListEntry) -> Result<()> {
        self(entry)
    }
}

/// Parser settings.
#[derive(Debug, Clone, Copy)]
pub struct ListingOptions<'a> {
    pub version: ListVersion,
    /// Skip dialect detection and harvest hrefs.
    pub href_search_only: bool,
    /// URL the listing came from; absolute hrefs to other hosts or directories are ignored.
    pub base: Option<&'a Url>,
    /// S3 key prefix removed from emitted names.
    pub s3_prefix: Option<&'a str>,
    /// Reference time for year-less dates.
    pub now: i64,
}

impl Default for ListingOptions<'_> {
    fn default() -> Self {
        ListingOptions {
            version: ListVersion::V2,
            href_search_only: false,
            base: None,
            s3_prefix: None,
            now: chrono::Utc::now().timestamp(),
        }
    }
}

/// What a parse found besides the entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingSummary {
    pub dialect: Dialect,
    /// Continuation marker of a truncated S3 listing.
    pub marker: Option<String>,
    /// False when another page must be requested with `marker`.
    pub complete: bool,
    pub emitted: usize,
}

/// Counts entries and enforces the name limit before handing them on.
pub(crate) struct Emitter<'h, H: ListingHandler> {
    handler: &'h mut H,
    emitted: usize,
}

impl<H: ListingHandler> Emitter<'_, H> {
    pub(crate) fn emit(&mut self, entry: ListEntry) -> Result<()> {
        if entry.name.len() > limits::MAX_FILENAME_LENGTH {
            tracing::warn!(name = %entry.name, "file name too long in listing");
            return Err(Error::FieldOverflow {
                field: "file name",
                limit: limits::MAX_FILENAME_LENGTH,
            });
        }
        self.handler.entry(entry)?;
        self.emitted += 1;
        Ok(())
    }
}

fn contains(hay: &[u8], needle: &[u8]) -> bool {
    find_from(hay, needle, 0).is_some()
}

fn find_from(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= hay.len() || needle.len() > hay.len() - from {
        return None;
    }
    hay[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Pick the dialect of a listing body.
pub fn detect(body: &[u8]) -> Dialect {
    let lower = body.to_ascii_lowercase();
    if let Some(h1) = find_from(&lower, b"<h1", 0) {
        let pre = find_from(&lower, b"<pre", h1);
        let table = find_from(&lower, b"<table", h1);
        match (pre, table) {
            (Some(p), Some(t)) if t < p => return Dialect::Table,
            (Some(_), _) => return Dialect::H1Pre,
            (None, Some(_)) => return Dialect::Table,
            (None, None) => {}
        }
    }
    if contains(body, b"<PRE>") {
        return Dialect::ApachePre;
    }
    if contains(body, b"<?xml version=\"") && (contains(body, b"<IsTruncated>") || contains(body, b"<KeyCount>")) {
        return Dialect::S3;
    }
    if contains(&lower, b"<div id=\"downloadlinkarea\"") {
        return Dialect::DownloadLinkArea;
    }
    if contains(&lower, b"<div id=\"contentdiv\"") {
        return Dialect::ContentDiv;
    }
    if contains(&lower, b"<table") {
        return Dialect::Table;
    }
    let trimmed = lower.trim_ascii_start();
    if contains(&lower, b"<pre") || trimmed.starts_with(b"<a href=") {
        return Dialect::MinimalPre;
    }
    if contains(&lower, b"<ul") {
        return Dialect::List;
    }
    Dialect::HrefList
}

/// Parse a listing, pushing each entry to `handler`.
pub fn parse<H: ListingHandler>(body: &[u8], opts: &ListingOptions<'_>, handler: &mut H) -> Result<ListingSummary> {
    let dialect = if opts.href_search_only {
        Dialect::HrefList
    } else {
        detect(body)
    };
    tracing::debug!(dialect = dialect.as_str(), bytes = body.len(), "parsing listing");
    let mut emitter = Emitter { handler, emitted: 0 };
    let (marker, complete) = match dialect {
        Dialect::S3 => s3::parse(body, opts, &mut emitter)?,
        _ => {
            let text = String::from_utf8_lossy(body);
            html::parse(dialect, &text, opts, &mut emitter)?;
            (None, true)
        }
    };
    Ok(ListingSummary {
        dialect,
        marker,
        complete,
        emitted: emitter.emitted,
    })
}

/// Parse a whole listing into a vector.
pub fn parse_all(body: &[u8], opts: &ListingOptions<'_>) -> Result<(Vec<ListEntry>, ListingSummary)> {
    let mut entries = Vec::new();
    let summary = parse(body, opts, &mut |e: ListEntry| {
        entries.push(e);
        Ok(())
    })?;
    Ok((entries, summary))
}
