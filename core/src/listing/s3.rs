/*
 * s3.rs
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

//! S3 `ListBucketResult` (v1 and v2). Only `Contents` entries are files; `CommonPrefixes`
//! and keys ending in `/` are directories and skipped.

use quick_xml::events::Event;
use quick_xml::Reader;

use super::date::parse_date;
use super::{Emitter, ListEntry, ListingHandler, ListingOptions};
use crate::config::ListVersion;
use crate::error::{Error, Result};

#[derive(Default)]
struct Contents {
    key: String,
    last_modified: String,
    etag: String,
    size: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    IsTruncated,
    NextMarker,
    NextToken,
    Key,
    LastModified,
    ETag,
    Size,
}

/// Returns the continuation marker and whether the listing is complete.
pub(super) fn parse<H: ListingHandler>(
    body: &[u8],
    opts: &ListingOptions<'_>,
    out: &mut Emitter<'_, H>,
) -> Result<(Option<String>, bool)> {
    let text = std::str::from_utf8(body).map_err(|e| Error::MalformedListing(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut field = Field::None;
    let mut current: Option<Contents> = None;
    let mut truncated = false;
    let mut next_marker: Option<String> = None;
    let mut next_token: Option<String> = None;
    let mut last_key: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                field = match e.name().as_ref() {
                    b"Contents" => {
                        current = Some(Contents::default());
                        Field::None
                    }
                    b"IsTruncated" => Field::IsTruncated,
                    b"NextMarker" => Field::NextMarker,
                    b"NextContinuationToken" => Field::NextToken,
                    b"Key" if current.is_some() => Field::Key,
                    b"LastModified" if current.is_some() => Field::LastModified,
                    b"ETag" if current.is_some() => Field::ETag,
                    b"Size" if current.is_some() => Field::Size,
                    _ => Field::None,
                };
            }
            Ok(Event::Text(e)) if field != Field::None => {
                let value = e
                    .unescape()
                    .map_err(|e| Error::MalformedListing(e.to_string()))?
                    .into_owned();
                match (field, current.as_mut()) {
                    (Field::IsTruncated, _) => truncated = value.eq_ignore_ascii_case("true"),
                    (Field::NextMarker, _) => next_marker = Some(value),
                    (Field::NextToken, _) => next_token = Some(value),
                    (Field::Key, Some(c)) => c.key = value,
                    (Field::LastModified, Some(c)) => c.last_modified = value,
                    (Field::ETag, Some(c)) => c.etag = value,
                    (Field::Size, Some(c)) => c.size = value,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                field = Field::None;
                if e.name().as_ref() == b"Contents" {
                    if let Some(c) = current.take() {
                        last_key = Some(c.key.clone());
                        if let Some(entry) = entry_from(c, opts)? {
                            out.emit(entry)?;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    if !truncated {
        return Ok((None, true));
    }
    match opts.version {
        ListVersion::V1 => match next_marker.or(last_key) {
            Some(marker) => Ok((Some(marker), false)),
            None => Ok((None, true)),
        },
        ListVersion::V2 => match next_token {
            Some(token) => Ok((Some(token), false)),
            None => Err(Error::MissingContinuationToken),
        },
    }
}

fn entry_from(c: Contents, opts: &ListingOptions<'_>) -> Result<Option<ListEntry>> {
    if c.key.is_empty() || c.key.ends_with('/') {
        return Ok(None);
    }
    let name = match opts.s3_prefix {
        Some(prefix) if !prefix.is_empty() => match c.key.strip_prefix(prefix) {
            Some(rest) => rest.trim_start_matches('/').to_string(),
            None => c.key,
        },
        _ => c.key,
    };
    if name.is_empty() {
        return Ok(None);
    }
    let mut entry = ListEntry::named(name);
    if !c.size.is_empty() {
        let size = c.size.trim().parse::<u64>().map_err(|_| Error::BadSize(c.size.clone()))?;
        entry.size = Some(size);
        entry.size_is_authoritative = true;
    }
    if !c.last_modified.is_empty() {
        let (ts, precision) = parse_date(&c.last_modified, opts.now)?;
        entry.mtime = Some(ts);
        entry.date_precision = precision;
    }
    let etag = c.etag.trim_matches('"');
    if !etag.is_empty() {
        entry.etag = Some(etag.to_string());
    }
    Ok(Some(entry))
}

#[cfg(test)]
mod tests {
    use super::super::{parse_all, DatePrecision, Dialect};
    use super::*;

    fn page(truncated: bool, tail: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><Name>bucket</Name><Prefix>obs/</Prefix><KeyCount>2</KeyCount><MaxKeys>1000</MaxKeys><IsTruncated>{}</IsTruncated>{}<Contents><Key>obs/a.grib</Key><LastModified>2020-01-01T12:00:00.000Z</LastModified><ETag>&quot;d41d8cd98f00b204e9800998ecf8427e&quot;</ETag><Size>1234</Size><StorageClass>STANDARD</StorageClass></Contents><Contents><Key>obs/sub/</Key><Size>0</Size></Contents><Contents><Key>obs/b.grib</Key><LastModified>2020-01-01T12:00:01.000Z</LastModified><Size>5</Size></Contents><CommonPrefixes><Prefix>obs/dir/</Prefix></CommonPrefixes></ListBucketResult>",
            truncated, tail
        )
    }

    fn opts(version: ListVersion) -> ListingOptions<'static> {
        ListingOptions {
            version,
            s3_prefix: Some("obs/"),
            now: 1_600_000_000,
            ..ListingOptions::default()
        }
    }

    #[test]
    fn contents_become_entries() {
        let body = page(false, "");
        let (entries, summary) = parse_all(body.as_bytes(), &opts(ListVersion::V2)).unwrap();
        assert_eq!(summary.dialect, Dialect::S3);
        assert!(summary.complete);
        assert_eq!(summary.marker, None);
        assert_eq!(entries.len(), 2);
        let a = &entries[0];
        assert_eq!(a.name, "a.grib");
        assert_eq!(a.size, Some(1234));
        assert!(a.size_is_authoritative);
        assert_eq!(a.mtime, Some(1_577_880_000));
        assert_eq!(a.date_precision, DatePrecision::Second);
        assert_eq!(a.etag.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
        assert!(a.is_exact());
        assert_eq!(entries[1].name, "b.grib");
    }

    #[test]
    fn v2_truncated_with_token() {
        let body = page(true, "<NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>");
        let (_, summary) = parse_all(body.as_bytes(), &opts(ListVersion::V2)).unwrap();
        assert!(!summary.complete);
        assert_eq!(summary.marker.as_deref(), Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM="));
    }

    #[test]
    fn v2_truncated_without_token_is_an_error() {
        let body = page(true, "");
        let mut seen = 0;
        let r = super::super::parse(body.as_bytes(), &opts(ListVersion::V2), &mut |_e: ListEntry| {
            seen += 1;
            Ok(())
        });
        assert!(matches!(r, Err(Error::MissingContinuationToken)));
        assert_eq!(seen, 2);
    }

    #[test]
    fn v1_marker_falls_back_to_last_key() {
        let body = page(true, "");
        let (_, summary) = parse_all(body.as_bytes(), &opts(ListVersion::V1)).unwrap();
        assert!(!summary.complete);
        assert_eq!(summary.marker.as_deref(), Some("obs/b.grib"));

        let body = page(true, "<NextMarker>obs/a.grib</NextMarker>");
        let (_, summary) = parse_all(body.as_bytes(), &opts(ListVersion::V1)).unwrap();
        assert_eq!(summary.marker.as_deref(), Some("obs/a.grib"));
    }

    #[test]
    fn bad_size_stops_the_parse() {
        let body = "<?xml version=\"1.0\"?><ListBucketResult><IsTruncated>false</IsTruncated><Contents><Key>x</Key><Size>lots</Size></Contents></ListBucketResult>";
        let r = parse_all(body.as_bytes(), &opts(ListVersion::V2));
        assert!(matches!(r, Err(Error::BadSize(_))));
    }
}
