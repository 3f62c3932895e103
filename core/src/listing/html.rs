/*
 * html.rs
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

//! HTML listing dialects. All of them share the anchor scanner, the href-to-name filter and
//! the date/size column reader; they differ in which region of the page holds the rows and
//! how a row ends.

use super::date::parse_date;
use super::entities::{decode_entities, strip_tags};
use super::size::parse_size;
use super::{Dialect, Emitter, ListEntry, ListingHandler, ListingOptions};
use crate::error::{Error, Result};
use crate::url::{decode_href, Url};

/// Origin and directory that relative names are resolved against.
struct Base {
    scheme: String,
    user: Option<String>,
    host: String,
    port: Option<u16>,
    dir: String,
}

impl Base {
    fn from_url(url: &Url) -> Base {
        let path = url.path.as_deref().unwrap_or("").trim_matches('/');
        let dir = if path.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", path)
        };
        Base {
            scheme: url.scheme.as_str().to_ascii_lowercase(),
            user: url.user.clone(),
            host: url.hostname.to_ascii_lowercase(),
            port: url.effective_port(),
            dir,
        }
    }

    fn same_origin(&self, scheme: &str, authority: &str) -> bool {
        let scheme = scheme.to_ascii_lowercase();
        if scheme != self.scheme {
            return false;
        }
        let (user, hostport) = match authority.rsplit_once('@') {
            Some((userinfo, hp)) => (Some(userinfo.split(':').next().unwrap_or("")), hp),
            None => (None, authority),
        };
        if let (Some(u), Some(mine)) = (user, self.user.as_deref()) {
            if decode_href(u) != mine {
                return false;
            }
        }
        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => (h, p.parse::<u16>().ok()),
            _ => (hostport, None),
        };
        let port = port.or(match scheme.as_str() {
            "http" => Some(80),
            "https" => Some(443),
            _ => None,
        });
        host.eq_ignore_ascii_case(&self.host) && port == self.port
    }
}

struct Anchor {
    href: String,
    /// Byte offset just past the anchor (after `</a>` when present).
    end: usize,
}

/// Anchor scanning over a page and its ASCII-lowercased twin (same byte offsets).
struct Page<'a> {
    src: &'a str,
    lower: String,
}

impl<'a> Page<'a> {
    fn new(src: &'a str) -> Page<'a> {
        Page {
            src,
            lower: src.to_ascii_lowercase(),
        }
    }

    fn find(&self, needle: &str, from: usize, limit: usize) -> Option<usize> {
        if from >= limit {
            return None;
        }
        self.lower[from..limit].find(needle).map(|i| i + from)
    }

    fn next_anchor(&self, from: usize, limit: usize) -> Option<(usize, Anchor)> {
        let bytes = self.lower.as_bytes();
        let mut pos = from;
        loop {
            let start = self.find("<a", pos, limit)?;
            if !bytes.get(start + 2).is_some_and(|b| b.is_ascii_whitespace()) {
                pos = start + 2;
                continue;
            }
            let tag_end = self.find(">", start, limit)?;
            let href = attr(&self.src[start..tag_end], "href");
            let end = match self.find("</a>", tag_end, limit) {
                Some(close) if self.find("<a", tag_end, close).is_none() => close + 4,
                _ => tag_end + 1,
            };
            match href {
                Some(href) => return Some((start, Anchor { href, end })),
                None => pos = end,
            }
        }
    }

    /// Text of `[from, to)` with tags removed.
    fn text(&self, from: usize, to: usize) -> String {
        if from >= to {
            return String::new();
        }
        strip_tags(&self.src[from..to])
    }

    /// Region between an opening tag (`<pre`, `<ul`, ...) and its close, or to the end.
    fn region(&self, open: &str, close: &str) -> Option<(usize, usize)> {
        let start = self.find(open, 0, self.lower.len())?;
        let body = self.find(">", start, self.lower.len()).map(|i| i + 1)?;
        let end = self.find(close, body, self.lower.len()).unwrap_or(self.lower.len());
        Some((body, end))
    }
}

/// Value of attribute `name` in a start tag, entity-decoded.
fn attr(tag: &str, name: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let mut from = 0;
    while let Some(i) = lower[from..].find(name) {
        let at = from + i;
        from = at + name.len();
        let preceded = at > 0 && lower.as_bytes()[at - 1].is_ascii_whitespace();
        let rest = lower[from..].trim_start();
        if !preceded || !rest.starts_with('=') {
            continue;
        }
        let value_start = tag.len() - rest.len() + 1;
        let v = tag[value_start..].trim_start();
        let value = match v.chars().next() {
            Some(q @ ('"' | '\'')) => v[1..].split(q).next().unwrap_or(""),
            _ => v
                .split(|c: char| c.is_whitespace() || c == '>')
                .next()
                .unwrap_or(""),
        };
        return Some(decode_entities(value));
    }
    None
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// File name an href refers to, or None when it names a directory, a query, another host
/// or something that is not a file of this directory.
fn name_from_href(href: &str, base: Option<&Base>, keep_path: bool) -> Option<String> {
    let h = href.trim();
    if h.is_empty() || h.starts_with('?') || h.starts_with('#') {
        return None;
    }
    let lower = h.to_ascii_lowercase();
    if lower.starts_with("mailto:") || lower.starts_with("javascript:") {
        return None;
    }
    let h = h.split(['?', '#']).next().unwrap_or(h);
    if h.ends_with('/') {
        return None;
    }
    let path = match h.split_once("://") {
        Some((scheme, rest)) => {
            let split = rest.find('/').unwrap_or(rest.len());
            let (authority, path) = rest.split_at(split);
            if let Some(b) = base {
                if !b.same_origin(scheme, authority) {
                    return None;
                }
            }
            path
        }
        None => h,
    };
    if keep_path {
        return (!path.is_empty()).then(|| decode_href(path));
    }
    let rel = if path.starts_with('/') {
        match base {
            Some(b) => path.strip_prefix(b.dir.as_str())?,
            None => basename(path),
        }
    } else {
        path.trim_start_matches("./")
    };
    if rel.is_empty() || rel.contains('/') || rel == ".." || rel == "." {
        return None;
    }
    Some(decode_href(rel))
}

/// Fill date and size from the columns after the name. Up to four tokens are tried as the
/// date, longest first; the token after it is the size.
fn read_columns(columns: &str, now: i64, strict: bool, entry: &mut ListEntry) -> Result<()> {
    let tokens: Vec<&str> = columns.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(());
    }
    for k in (1..=tokens.len().min(4)).rev() {
        if let Ok((ts, precision)) = parse_date(&tokens[..k].join(" "), now) {
            entry.mtime = Some(ts);
            entry.date_precision = precision;
            if let Some(tok) = tokens.get(k) {
                match parse_size(tok) {
                    Ok(size) => entry.apply_size(size),
                    Err(e) if strict => return Err(e),
                    Err(_) => {}
                }
            }
            return Ok(());
        }
    }
    if strict {
        return Err(Error::BadDate(tokens[..tokens.len().min(4)].join(" ")));
    }
    if let Ok(size) = parse_size(tokens[0]) {
        entry.apply_size(size);
    }
    Ok(())
}

/// Table cells are scanned one by one: the first cell that reads as a date gives the date,
/// the first that reads as a size gives the size.
fn read_cells(cells: &[String], now: i64, entry: &mut ListEntry) {
    for cell in cells {
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        if entry.mtime.is_none() {
            if let Ok((ts, precision)) = parse_date(cell, now) {
                entry.mtime = Some(ts);
                entry.date_precision = precision;
                continue;
            }
        }
        if entry.size.is_none() {
            if let Ok(Some(size)) = parse_size(cell) {
                entry.apply_size(Some(size));
            }
        }
    }
}

struct Rows<'p, 'o> {
    page: Page<'p>,
    base: Option<Base>,
    opts: &'o ListingOptions<'o>,
}

impl Rows<'_, '_> {
    fn name(&self, href: &str, keep_path: bool) -> Option<String> {
        name_from_href(href, self.base.as_ref(), keep_path)
    }

    /// Line-oriented rows: each anchor is followed by its columns up to the end of the line.
    fn lines<H: ListingHandler>(
        &self,
        from: usize,
        to: usize,
        strict: bool,
        keep_path: bool,
        out: &mut Emitter<'_, H>,
    ) -> Result<()> {
        let mut pos = from;
        while let Some((_, anchor)) = self.page.next_anchor(pos, to) {
            pos = anchor.end;
            let Some(name) = self.name(&anchor.href, keep_path) else {
                continue;
            };
            let line_end = self.page.find("\n", anchor.end, to).unwrap_or(to);
            let row_end = self
                .page
                .next_anchor(anchor.end, line_end)
                .map(|(start, _)| start)
                .unwrap_or(line_end);
            let mut entry = ListEntry::named(name);
            read_columns(&self.page.text(anchor.end, row_end), self.opts.now, strict, &mut entry)?;
            out.emit(entry)?;
        }
        Ok(())
    }

    /// Names only.
    fn names<H: ListingHandler>(&self, from: usize, to: usize, out: &mut Emitter<'_, H>) -> Result<()> {
        let mut pos = from;
        while let Some((_, anchor)) = self.page.next_anchor(pos, to) {
            pos = anchor.end;
            if let Some(name) = self.name(&anchor.href, false) {
                out.emit(ListEntry::named(name))?;
            }
        }
        Ok(())
    }

    fn table<H: ListingHandler>(&self, from: usize, to: usize, out: &mut Emitter<'_, H>) -> Result<()> {
        let mut pos = from;
        while let Some(tr) = self.page.find("<tr", pos, to) {
            let row_start = tr + 3;
            let row_end = self
                .page
                .find("</tr", row_start, to)
                .or_else(|| self.page.find("<tr", row_start, to))
                .unwrap_or(to);
            pos = row_end;
            let Some((_, anchor)) = self.page.next_anchor(row_start, row_end) else {
                continue;
            };
            let Some(name) = self.name(&anchor.href, false) else {
                continue;
            };
            let mut cells = Vec::new();
            let mut cell = self.page.find("<td", anchor.end, row_end);
            while let Some(start) = cell {
                let next = self.page.find("<td", start + 3, row_end);
                let content = self.page.find(">", start, row_end).map(|i| i + 1).unwrap_or(row_end);
                cells.push(self.page.text(content, next.unwrap_or(row_end)));
                cell = next;
            }
            let mut entry = ListEntry::named(name);
            read_cells(&cells, self.opts.now, &mut entry);
            out.emit(entry)?;
        }
        Ok(())
    }
}

/// Parse an HTML listing already classified as `dialect`.
pub(super) fn parse<H: ListingHandler>(
    dialect: Dialect,
    text: &str,
    opts: &ListingOptions<'_>,
    out: &mut Emitter<'_, H>,
) -> Result<()> {
    let rows = Rows {
        page: Page::new(text),
        base: opts.base.map(Base::from_url),
        opts,
    };
    let len = text.len();
    match dialect {
        Dialect::H1Pre => {
            let h1 = rows.page.find("<h1", 0, len).unwrap_or(0);
            let pre = rows.page.find("<pre", h1, len).ok_or_else(|| malformed("no <pre> after <h1>"))?;
            let body = rows.page.find(">", pre, len).map(|i| i + 1).unwrap_or(len);
            let end = rows.page.find("</pre", body, len).unwrap_or(len);
            rows.lines(body, end, true, false, out)
        }
        Dialect::ApachePre => {
            let (body, end) = rows.page.region("<pre", "</pre").ok_or_else(|| malformed("no <PRE>"))?;
            let start = match rows.page.find("<hr", body, end) {
                Some(hr) => rows.page.find(">", hr, end).map(|i| i + 1).unwrap_or(end),
                None => body,
            };
            rows.lines(start, end, true, false, out)
        }
        Dialect::DownloadLinkArea => {
            let (body, end) = rows
                .page
                .region("<div id=\"downloadlinkarea\"", "</div")
                .ok_or_else(|| malformed("no downloadLinkArea"))?;
            rows.lines(body, end, false, true, out)
        }
        Dialect::ContentDiv => {
            let (body, end) = rows
                .page
                .region("<div id=\"contentdiv\"", "</div")
                .ok_or_else(|| malformed("no contentDiv"))?;
            rows.lines(body, end, false, false, out)
        }
        Dialect::Table => {
            let (body, end) = rows.page.region("<table", "</table").unwrap_or((0, len));
            rows.table(body, end, out)
        }
        Dialect::MinimalPre => {
            let (body, end) = rows.page.region("<pre", "</pre").unwrap_or((0, len));
            rows.lines(body, end, false, false, out)
        }
        Dialect::List => {
            let (body, end) = rows.page.region("<ul", "</ul").unwrap_or((0, len));
            rows.names(body, end, out)
        }
        Dialect::HrefList => rows.names(0, len, out),
        Dialect::S3 => Err(Error::UnknownListingDialect),
    }
}

fn malformed(what: &str) -> Error {
    Error::MalformedListing(what.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::{parse_all, DatePrecision};
    use super::*;

    const NOW: i64 = 1_600_000_000;

    fn opts() -> ListingOptions<'static> {
        ListingOptions {
            now: NOW,
            ..ListingOptions::default()
        }
    }

    #[test]
    fn href_filter() {
        let url = Url {
            scheme: crate::url::Scheme::Http,
            hostname: "data.example.org".into(),
            path: Some("pub/obs".into()),
            ..Url::default()
        };
        let base = Base::from_url(&url);
        let b = Some(&base);
        assert_eq!(name_from_href("a%20b.txt", b, false).as_deref(), Some("a b.txt"));
        assert_eq!(name_from_href("./x.bin", b, false).as_deref(), Some("x.bin"));
        assert_eq!(name_from_href("/pub/obs/y.bin", b, false).as_deref(), Some("y.bin"));
        assert_eq!(name_from_href("/pub/other/y.bin", b, false), None);
        assert_eq!(name_from_href("http://data.example.org/pub/obs/z", b, false).as_deref(), Some("z"));
        assert_eq!(name_from_href("http://data.example.org:80/pub/obs/z", b, false).as_deref(), Some("z"));
        assert_eq!(name_from_href("http://elsewhere.org/pub/obs/z", b, false), None);
        assert_eq!(name_from_href("sub/", b, false), None);
        assert_eq!(name_from_href("../", b, false), None);
        assert_eq!(name_from_href("?C=M;O=A", b, false), None);
        assert_eq!(name_from_href("#top", b, false), None);
        assert_eq!(name_from_href("mailto:ops@example.org", b, false), None);
        assert_eq!(name_from_href("deeper/file", b, false), None);
        assert_eq!(name_from_href("/x/y/file", None, true).as_deref(), Some("/x/y/file"));
    }

    #[test]
    fn attribute_quoting() {
        assert_eq!(attr("<a href=\"x y\"", "href").as_deref(), Some("x y"));
        assert_eq!(attr("<A HREF='x'", "href").as_deref(), Some("x"));
        assert_eq!(attr("<a class=c href=x title=t", "href").as_deref(), Some("x"));
        assert_eq!(attr("<a data-href=\"no\" href=\"yes\"", "href").as_deref(), Some("yes"));
        assert_eq!(attr("<a name=\"n\"", "href"), None);
        assert_eq!(attr("<a href=\"a&amp;b\"", "href").as_deref(), Some("a&b"));
    }

    #[test]
    fn nginx_h1_pre() {
        let body = "<html><head><title>Index of /pub/</title></head>\n<body>\n<h1>Index of /pub/</h1><hr><pre><a href=\"../\">../</a>\n<a href=\"data/\">data/</a>                                              12-Mar-2020 08:15                   -\n<a href=\"obs_2020.grib2\">obs_2020.grib2</a>                                     12-Mar-2020 08:16             1048576\n</pre><hr></body>\n</html>\n";
        assert_eq!(super::super::detect(body.as_bytes()), Dialect::H1Pre);
        let (entries, _) = parse_all(body.as_bytes(), &opts()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "obs_2020.grib2");
        assert_eq!(entries[0].size, Some(1_048_576));
        assert!(entries[0].size_is_authoritative);
        assert_eq!(entries[0].date_precision, DatePrecision::Minute);
    }

    #[test]
    fn strict_rows_reject_garbage_dates() {
        let body = "<h1>Index</h1><pre>\n<a href=\"good\">good</a>  01-Jan-2020 12:00  10\n<a href=\"bad\">bad</a>  sometime  10\n</pre>";
        let mut names = Vec::new();
        let r = super::super::parse(body.as_bytes(), &opts(), &mut |e: ListEntry| {
            names.push(e.name);
            Ok(())
        });
        assert!(matches!(r, Err(Error::BadDate(_))));
        assert_eq!(names, ["good"]);
    }

    #[test]
    fn apache_fancy_table() {
        let body = "<!DOCTYPE HTML>\n<html><body>\n<h1>Index of /pub</h1>\n<table>\n<tr><th><a href=\"?C=N;O=D\">Name</a></th><th>Last modified</th><th>Size</th></tr>\n<tr><td valign=\"top\"><img src=\"/icons/back.gif\"></td><td><a href=\"/\">Parent Directory</a></td><td>&nbsp;</td><td align=\"right\">  - </td></tr>\n<tr><td valign=\"top\"><img src=\"/icons/text.gif\"></td><td><a href=\"readme.txt\">readme.txt</a></td><td align=\"right\">2020-01-01 12:00  </td><td align=\"right\">2.0K</td></tr>\n</table>\n</body></html>\n";
        assert_eq!(super::super::detect(body.as_bytes()), Dialect::Table);
        let (entries, _) = parse_all(body.as_bytes(), &opts()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "readme.txt");
        assert_eq!(entries[0].mtime, Some(1_577_880_000));
        assert_eq!(entries[0].size, Some(2048));
        assert!(!entries[0].size_is_authoritative);
    }

    #[test]
    fn download_link_area_keeps_paths() {
        let body = "<html><div id=\"downloadLinkArea\">\n<a href=\"/files/2020/a.nc\">a.nc</a> 2020-01-01 12:00 4K<br>\n<a href=\"/files/2020/b.nc\">b.nc</a><br>\n</div><a href=\"/elsewhere\">x</a></html>";
        let (entries, summary) = parse_all(body.as_bytes(), &opts()).unwrap();
        assert_eq!(summary.dialect, Dialect::DownloadLinkArea);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["/files/2020/a.nc", "/files/2020/b.nc"]);
        assert_eq!(entries[0].size, Some(4096));
        assert_eq!(entries[1].size, None);
    }

    #[test]
    fn content_div_relative() {
        let body = "<div id=\"contentDiv\"><a href=\"x.dat\">x.dat</a> 01 Feb 2020 10:00:05 12\n<a href=\"sub/y\">y</a>\n</div>";
        let (entries, _) = parse_all(body.as_bytes(), &opts()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "x.dat");
        assert_eq!(entries[0].date_precision, DatePrecision::Second);
        assert_eq!(entries[0].size, Some(12));
    }

    #[test]
    fn minimal_and_lists() {
        let pre = "<a href=\"one\">one</a> 2020-01-01 5\n<a href=\"two\">two</a>\n";
        let (entries, summary) = parse_all(pre.as_bytes(), &opts()).unwrap();
        assert_eq!(summary.dialect, Dialect::MinimalPre);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].date_precision, DatePrecision::Day);
        assert_eq!(entries[0].size, Some(5));

        let ul = "<ul><li><a href=\"a.txt\">a</a></li><li><a href=\"d/\">d</a></li><li><a href=\"M&uuml;ller.txt\">m</a></li></ul>";
        let (entries, _) = parse_all(ul.as_bytes(), &opts()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "Müller.txt"]);
    }

    #[test]
    fn href_search_only_overrides_detection() {
        let body = "<table><tr><td><a href=\"t.bin\">t</a></td><td>2020-01-01</td></tr></table>";
        let o = ListingOptions {
            href_search_only: true,
            ..opts()
        };
        let (entries, summary) = parse_all(body.as_bytes(), &o).unwrap();
        assert_eq!(summary.dialect, Dialect::HrefList);
        assert_eq!(entries[0].name, "t.bin");
        assert_eq!(entries[0].mtime, None);
    }
}
