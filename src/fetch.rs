//! src/fetch.rs
//! Downloads source archives, helper tools and assets into the build root.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, IoContext, Result};
use crate::output;

const USER_AGENT: &str = concat!("r-appimage/", env!("CARGO_PKG_VERSION"));

/// Whether [`ensure_cached`] had to fetch the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    Downloaded,
    Cached,
}

/// Downloads `url` to `dest` unless `dest` already exists. Presence of the file is
/// the only freshness check.
pub fn ensure_cached<F>(url: &str, dest: &Path, download: F) -> Result<Fetched>
where
    F: FnOnce(&str, &Path) -> Result<()>,
{
    if dest.is_file() {
        debug!(path = %dest.display(), "cache hit, skipping download");
        return Ok(Fetched::Cached);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    download(url, dest)?;
    Ok(Fetched::Downloaded)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Downloads a file over HTTP(S), showing a progress bar. The body is streamed into
/// `<dest>.part` and renamed on completion so an interrupted download never looks cached.
pub fn download_file_with_progress(url: &str, dest: &Path) -> Result<()> {
    output::info(&format!("Downloading {}", url));
    let net = |source| Error::Download {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(None::<std::time::Duration>)
        .build()
        .map_err(net)?;
    let mut response = client.get(url).send().map_err(net)?;
    if !response.status().is_success() {
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let total_size = response.content_length().unwrap_or(0);
    let pb = output::download_bar(total_size);

    let part = partial_path(dest);
    let mut dest_file = File::create(&part).at(&part)?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = response.read(&mut buf).map_err(|e| Error::io(&part, e))?;
        if n == 0 {
            break;
        }
        dest_file.write_all(&buf[..n]).at(&part)?;
        pb.inc(n as u64);
    }
    dest_file.flush().at(&part)?;
    drop(dest_file);
    fs::rename(&part, dest).at(dest)?;

    pb.finish_and_clear();
    output::success(&format!("Saved {}", dest.display()));
    Ok(())
}
