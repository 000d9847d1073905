// src/fetch/download.rs

//! URL downloads with an on-disk cache
//!
//! Each URL is stored once under `<cache>/downloads/<sha1(url)>-<basename>`.
//! A cached file is reused without contacting the server again, so
//! re-running an interrupted build only fetches what is still missing.
//!
//! A failed request is not retried; the caller gets the error with the URL.

use crate::error::{Error, Result};
use crate::hash::hash_str;
use reqwest::blocking::Client;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Default timeout for HTTP requests (10 minutes; images and charts are large)
const HTTP_TIMEOUT: Duration = Duration::from_secs(600);

const STREAM_BUFFER_SIZE: usize = 8192;

/// Blocking HTTP downloader backed by a directory cache
pub struct Downloader {
    client: Client,
    cache_dir: PathBuf,
}

impl Downloader {
    pub fn new(cache_dir: &Path) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            cache_dir: cache_dir.join("downloads"),
        })
    }

    /// Where `url` is (or will be) cached
    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}", hash_str(url), url_basename(url)))
    }

    /// Download `url` unless it is already cached, returning the local path
    pub fn download(&self, url: &str) -> Result<PathBuf> {
        let target = self.cache_path(url);
        if target.is_file() {
            debug!("Using cached download of {}", url);
            return Ok(target);
        }

        fs::create_dir_all(&self.cache_dir)?;
        info!("Downloading {}", url);

        let bytes = self.fetch(url, &target)?;
        debug!("Downloaded {} bytes from {}", bytes, url);
        Ok(target)
    }

    fn fetch(&self, url: &str, target: &Path) -> Result<u64> {
        let network = |message: String| Error::Network {
            url: url.to_string(),
            message,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(network(format!("HTTP {}", response.status())));
        }

        // Stream into a temp file in the cache dir so a partial download never
        // appears under the final name
        let mut temp = NamedTempFile::new_in(&self.cache_dir)?;
        let written = stream_to(&mut response, temp.as_file_mut())
            .map_err(|e| network(format!("Failed to read response: {e}")))?;
        temp.as_file_mut().sync_all()?;
        temp.persist(target).map_err(|e| Error::Io(e.error))?;

        Ok(written)
    }
}

fn stream_to<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<u64> {
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }
}

/// Last path segment of a URL, without query or fragment
fn url_basename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    let name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '_' })
        .collect();

    if name.is_empty() || name.contains("://") {
        "download".to_string()
    } else {
        name
    }
}
