/*
 * cli.rs
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

use clap::Parser;

use filedist_core::config::{FetchOptions, TransferFeatures};

/// Fetch an HTTP directory listing (or read one from a file) and print what the listing
/// parser makes of it.
#[derive(Parser, Debug)]
#[command(name = "ahtml_list", version, about)]
pub struct Cli {
    /// Directory URL, or a file holding a saved listing.
    pub target: String,

    /// Transfer block size in bytes.
    #[arg(short = 'b', value_name = "BLOCKSIZE")]
    pub block_size: Option<usize>,

    /// Save each fetched listing page and remove it after parsing.
    #[arg(short = 'c', conflicts_with = "keep_content")]
    pub remove_content: bool,

    /// Save each fetched listing page and keep it.
    #[arg(short = 'C')]
    pub keep_content: bool,

    /// Never send `Expect: 100-continue`.
    #[arg(short = 'E')]
    pub no_expect: bool,

    /// Only look for `href`s, whatever the page looks like.
    #[arg(short = 'f')]
    pub href_only: bool,

    /// Index page to request inside the directory, e.g. `index.html`.
    #[arg(short = 'i', value_name = "INDEX")]
    pub index: Option<String>,

    /// HTTP proxy as `host[:port]`.
    #[arg(short = 'P', value_name = "PROXY")]
    pub proxy: Option<String>,

    /// Socket receive buffer size.
    #[arg(short = 'R', value_name = "BYTES")]
    pub rcvbuf: Option<u32>,

    /// Socket send buffer size.
    #[arg(short = 'S', value_name = "BYTES")]
    pub sndbuf: Option<u32>,

    /// Transfer timeout in seconds.
    #[arg(short = 't', value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// URL the listing was fetched from, when TARGET is a file.
    #[arg(short = 'u', value_name = "URL")]
    pub url: Option<String>,

    /// More output; repeat for protocol traces.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Allow legacy TLS renegotiation.
    #[arg(short = 'x')]
    pub legacy_renegotiation: bool,

    /// Verify the server certificate strictly.
    #[arg(short = 'Y')]
    pub strict_tls: bool,
}

impl Cli {
    /// The fetch options these flags stand for.
    pub fn fetch_options(&self) -> FetchOptions {
        let mut o = FetchOptions {
            href_search_only: self.href_only,
            features: TransferFeatures {
                tls_strict_verify: self.strict_tls,
                tls_legacy_renegotiation: self.legacy_renegotiation,
                no_expect: self.no_expect,
                sndbuf_size: self.sndbuf,
                rcvbuf_size: self.rcvbuf,
                ..TransferFeatures::default()
            },
            ..FetchOptions::default()
        };
        if let Some(b) = self.block_size {
            o.block_size = b;
        }
        if let Some(t) = self.timeout {
            o.transfer_timeout = t;
        }
        o
    }

    pub fn saves_content(&self) -> bool {
        self.remove_content || self.keep_content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_options() {
        let cli = Cli::parse_from(["ahtml_list", "-f", "-E", "-Y", "-b", "4096", "-t", "30", "-R", "8192", "http://h/d/"]);
        let o = cli.fetch_options();
        assert!(o.href_search_only);
        assert!(o.features.no_expect);
        assert!(o.features.tls_strict_verify);
        assert!(!o.features.tls_legacy_renegotiation);
        assert_eq!(o.block_size, 4096);
        assert_eq!(o.transfer_timeout, 30);
        assert_eq!(o.features.rcvbuf_size, Some(8192));
        assert_eq!(cli.target, "http://h/d/");
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::parse_from(["ahtml_list", "-vv", "listing.html"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.saves_content());
    }
}
