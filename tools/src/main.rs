/*
 * main.rs
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

mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use filedist_core::error::exit;
use filedist_core::fetch::{connect_params, s3_key_prefix};
use filedist_core::listing::{self, ListEntry, ListingOptions, ListingSummary};
use filedist_core::protocol::http::{GetOutcome, HttpSession, ListingRequest, Proxy};
use filedist_core::url::Service;
use filedist_core::{Error, Result, Url};

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_entry(e: &ListEntry) {
    println!(
        "{} {} {} {} {}",
        e.name,
        e.size.map_or(-1, |s| s as i64),
        u8::from(e.size_is_authoritative),
        e.mtime.unwrap_or(-1),
        e.date_precision.as_str()
    );
}

fn print_summary(entries: usize, pages: usize, last: &ListingSummary) {
    println!(
        "{} entries in {} page(s), dialect {}, marker {}",
        entries,
        pages,
        last.dialect.as_str(),
        last.marker.as_deref().unwrap_or("-")
    );
}

/// Parse one page, print its tuples, return the summary and how many there were.
fn parse_page(body: &[u8], opts: &ListingOptions<'_>) -> Result<(ListingSummary, usize)> {
    let (entries, summary) = listing::parse_all(body, opts)?;
    for e in &entries {
        print_entry(e);
    }
    Ok((summary, entries.len()))
}

fn is_url(target: &str) -> bool {
    target.contains("://")
}

async fn list_file(cli: &Cli, path: &Path) -> Result<()> {
    let body = tokio::fs::read(path)
        .await
        .map_err(|e| Error::local("read", path, e))?;
    let base = cli.url.as_deref().map(Url::parse).transpose().map_err(Error::Url)?;
    let opts = ListingOptions {
        href_search_only: cli.href_only,
        base: base.as_ref(),
        ..ListingOptions::default()
    };
    let (summary, n) = parse_page(&body, &opts)?;
    print_summary(n, 1, &summary);
    Ok(())
}

async fn save_content(page: usize, body: &[u8]) -> Result<PathBuf> {
    let path = PathBuf::from(format!("ahtml_list.{}.content", page));
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| Error::local("write", &path, e))?;
    Ok(path)
}

async fn fetch_index(session: &mut HttpSession, dir: &str, index: &str) -> Result<Vec<u8>> {
    match session.get(dir, index, 0).await? {
        GetOutcome::Body(_) => {}
        GetOutcome::NothingToFetch => return Ok(Vec::new()),
        GetOutcome::Status(code) => {
            return Err(Error::UnexpectedStatus {
                code,
                reply: session.last_reply().map(str::to_string),
            })
        }
    }
    let mut body = Vec::new();
    let mut buf = vec![0u8; session.params().block_size];
    loop {
        let n = session.read(&mut buf).await?;
        if n == 0 {
            return Ok(body);
        }
        body.extend_from_slice(&buf[..n]);
    }
}

async fn list_remote(cli: &Cli, target: &str) -> Result<()> {
    let url = Url::parse(target).map_err(Error::Url)?;
    let proxy = cli.proxy.as_deref().map(Proxy::parse).transpose()?;
    let options = cli.fetch_options();
    let params = connect_params(&url, proxy.as_ref(), &options);
    tracing::debug!(host = %params.host, port = params.port, tls = params.tls, "connecting");
    let mut session = HttpSession::connect(params).await?;
    let dir = url.path.clone().unwrap_or_default();
    let prefix = (url.service == Service::S3).then(|| s3_key_prefix(&dir)).flatten();
    let opts = ListingOptions {
        version: options.list_version,
        href_search_only: options.href_search_only,
        base: Some(&url),
        s3_prefix: prefix.as_deref(),
        ..ListingOptions::default()
    };
    let req = ListingRequest {
        version: options.list_version,
        max_dir_buffer: options.max_dir_buffer,
        no_delimiter: options.no_delimiter,
        keep_path: options.keep_path,
    };

    // An index page is a single request.
    session.set_closing(cli.index.is_some());
    let mut pages = 0;
    let mut total = 0;
    let last = loop {
        let body = match &cli.index {
            Some(index) => fetch_index(&mut session, &dir, index).await?,
            None => session.get_listing(&dir, &req).await?,
        };
        pages += 1;
        let saved = if cli.saves_content() {
            Some(save_content(pages, &body).await?)
        } else {
            None
        };
        let (summary, n) = parse_page(&body, &opts)?;
        total += n;
        if let (Some(path), true) = (&saved, cli.remove_content) {
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| Error::local("unlink", path, e))?;
        }
        if summary.complete || cli.index.is_some() {
            break summary;
        }
        session.set_marker(summary.marker.clone());
    };
    session.quit().await;
    print_summary(total, pages, &last);
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    if is_url(&cli.target) {
        list_remote(cli, &cli.target).await
    } else {
        list_file(cli, Path::new(&cli.target)).await
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = tokio::select! {
        r = run(&cli) => match r {
            Ok(()) => exit::TRANSFER_SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, target = %cli.target, "ahtml_list failed");
                e.exit_code()
            }
        },
        _ = tokio::signal::ctrl_c() => {
            let e = Error::GotKilled;
            tracing::warn!(error = %e, "interrupted");
            e.exit_code()
        }
    };
    ExitCode::from(code.clamp(0, 255) as u8)
}
