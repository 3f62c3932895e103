/*
 * naming.rs
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

//! Local names for fetched files.

/// Remote name as one local path component: directory separators become `\`.
pub fn escape_separators(remote: &str) -> String {
    remote.trim_start_matches('/').replace('/', "\\")
}

/// Temporary name while downloading: the escaped name behind a `.`.
pub fn temp_name(remote: &str) -> String {
    format!(".{}", escape_separators(remote))
}

fn strip_dots(name: &str) -> Option<String> {
    let name = name.trim_start_matches('.');
    (!name.is_empty()).then(|| name.to_string())
}

/// Final local name. `keep_path` keeps the directory components (escaped), otherwise only
/// the base name survives. Leading dots are stripped; None when nothing is left.
pub fn final_name(remote: &str, keep_path: bool) -> Option<String> {
    if keep_path {
        strip_dots(&escape_separators(remote))
    } else {
        strip_dots(remote.rsplit('/').next().unwrap_or(remote))
    }
}

/// A `Content-Disposition` filename reduced to a safe base name.
pub fn disposition_name(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename).trim();
    strip_dots(base)
}

/// Name for a file the server did not name.
pub fn no_name(worker_id: u32, counter: u32) -> String {
    format!("NO_NAME.{}.{}", worker_id, counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(temp_name("a/b.txt"), ".a\\b.txt");
        assert_eq!(final_name("a/b.txt", true).as_deref(), Some("a\\b.txt"));
        assert_eq!(final_name("a/b.txt", false).as_deref(), Some("b.txt"));
        assert_eq!(final_name(".hidden", false).as_deref(), Some("hidden"));
        assert_eq!(final_name("...", false), None);
        assert_eq!(disposition_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(disposition_name("C:\\x\\report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(no_name(3, 12), "NO_NAME.3.12");
    }
}
