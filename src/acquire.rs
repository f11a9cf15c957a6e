//! Finds this month's update file on the published listing and brings it
//! (with its checksum sidecar) onto local disk.

use crate::integrity;
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::Url;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("invalid listing url {0}: {1}")]
    Url(String, String),
    #[error("could not fetch {url}: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("no {marker:?} file published for {year}-{month:02} in the listing")]
    NotListed { marker: String, year: i32, month: u32 },
    #[error("giving up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// One row of the published listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingEntry {
    pub filename: String,
    pub href: Option<String>,
    pub published: NaiveDate,
    pub checksum: String,
}

/// A local data file ready for verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acquired {
    pub path: PathBuf,
    pub checksum: String,
}

fn parse_listing_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%m/%d/%Y"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d"))
        .ok()
}

lazy_static! {
    static ref ROW: Regex = Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap();
    static ref CELL: Regex = Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap();
    static ref HREF: Regex = Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref TAG: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref MD5_HEX: Regex = Regex::new(r"^[0-9a-fA-F]{32}$").unwrap();
}

/// Pulls `(filename, date, md5)` rows out of the listing page's table.
/// Rows that do not have all three are ignored.
pub fn parse_listing(html: &str) -> Vec<ListingEntry> {
    let mut entries = Vec::new();
    for row in ROW.captures_iter(html) {
        let cells: Vec<&str> = CELL
            .captures_iter(&row[1])
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if cells.len() < 3 {
            continue;
        }
        let text = |cell: &str| TAG.replace_all(cell, "").trim().to_string();

        let filename = text(cells[0]);
        let checksum = text(cells[2]);
        let Some(published) = parse_listing_date(&text(cells[1])) else {
            continue;
        };
        if filename.is_empty() || !MD5_HEX.is_match(&checksum) {
            continue;
        }
        entries.push(ListingEntry {
            filename,
            href: HREF.captures(cells[0]).map(|c| c[1].to_string()),
            published,
            checksum: checksum.to_lowercase(),
        });
    }
    entries
}

/// First entry whose name carries `marker` and whose date is in `today`'s month.
pub fn select_current<'a>(
    entries: &'a [ListingEntry],
    marker: &str,
    today: NaiveDate,
) -> Option<&'a ListingEntry> {
    let marker = marker.to_lowercase();
    entries.iter().find(|entry| {
        entry.filename.to_lowercase().contains(&marker)
            && entry.published.year() == today.year()
            && entry.published.month() == today.month()
    })
}

enum Attempt {
    Retry(String),
    Fatal(AcquireError),
}

pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

pub struct Fetcher {
    client: Client,
    listing_url: Url,
    credentials: Option<Credentials>,
    retries: u32,
    download_dir: PathBuf,
}

impl Fetcher {
    pub fn new(
        listing_url: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
        retries: u32,
        download_dir: PathBuf,
    ) -> Result<Fetcher, AcquireError> {
        let listing_url = Url::parse(listing_url)
            .map_err(|err| AcquireError::Url(listing_url.to_string(), err.to_string()))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| AcquireError::Http {
                url: listing_url.to_string(),
                source,
            })?;
        Ok(Fetcher {
            client,
            listing_url,
            credentials,
            retries: retries.max(1),
            download_dir,
        })
    }

    fn get(&self, url: &Url) -> Result<reqwest::blocking::Response, reqwest::Error> {
        let mut request = self.client.get(url.clone());
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.user, creds.password.as_ref());
        }
        request.send()?.error_for_status()
    }

    pub fn listing(&self) -> Result<Vec<ListingEntry>, AcquireError> {
        let http = |source: reqwest::Error| AcquireError::Http {
            url: self.listing_url.to_string(),
            source,
        };
        let body = self.get(&self.listing_url).map_err(http)?.text().map_err(http)?;
        let entries = parse_listing(&body);
        log::debug!("listing has {} usable rows", entries.len());
        Ok(entries)
    }

    fn attempt(&self, url: &Url, partial: &Path) -> Result<(), Attempt> {
        let mut response = self
            .get(url)
            .map_err(|err| Attempt::Retry(err.to_string()))?;
        let mut file = File::create(partial).map_err(|source| {
            Attempt::Fatal(AcquireError::Io {
                path: partial.to_path_buf(),
                source,
            })
        })?;
        response
            .copy_to(&mut file)
            .map_err(|err| Attempt::Retry(err.to_string()))?;
        Ok(())
    }

    fn download(&self, url: &Url, dest: &Path) -> Result<(), AcquireError> {
        let mut partial = dest.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let mut last = String::new();
        for attempt in 1..=self.retries {
            log::info!("downloading {} (attempt {}/{})", url, attempt, self.retries);
            match self.attempt(url, &partial) {
                Ok(()) => {
                    return fs::rename(&partial, dest).map_err(|source| AcquireError::Io {
                        path: dest.to_path_buf(),
                        source,
                    });
                }
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Retry(reason)) => {
                    log::warn!("download of {} failed: {}", url, reason);
                    last = reason;
                    let _ = fs::remove_file(&partial);
                    if attempt < self.retries {
                        thread::sleep(Duration::from_secs(u64::from(attempt)));
                    }
                }
            }
        }
        Err(AcquireError::Exhausted {
            url: url.to_string(),
            attempts: self.retries,
            last,
        })
    }

    /// Makes `entry` available locally, reusing an existing copy, and records
    /// its checksum next to it.
    pub fn materialize(&self, entry: &ListingEntry) -> Result<Acquired, AcquireError> {
        let name = Path::new(&entry.filename).file_name().ok_or_else(|| AcquireError::Io {
            path: PathBuf::from(&entry.filename),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "listing row has no usable file name",
            ),
        })?;
        let path = self.download_dir.join(name);
        if path.exists() {
            log::info!("{} already present, not downloading", path.display());
        } else {
            let link = entry.href.as_deref().unwrap_or(&entry.filename);
            let url = self
                .listing_url
                .join(link)
                .map_err(|err| AcquireError::Url(link.to_string(), err.to_string()))?;
            self.download(&url, &path)?;
        }

        let sidecar = integrity::write_sidecar(&path, &entry.checksum).map_err(|source| {
            AcquireError::Io {
                path: integrity::sidecar_path(&path),
                source,
            }
        })?;
        log::debug!("wrote {}", sidecar.display());
        Ok(Acquired {
            path,
            checksum: entry.checksum.clone(),
        })
    }

    /// Resolves and fetches the update file published for `today`'s month.
    pub fn fetch_update(&self, marker: &str, today: NaiveDate) -> Result<Acquired, AcquireError> {
        let entries = self.listing()?;
        let entry = select_current(&entries, marker, today).ok_or_else(|| {
            AcquireError::NotListed {
                marker: marker.to_string(),
                year: today.year(),
                month: today.month(),
            }
        })?;
        log::info!(
            "current update is {} published {} (md5 {})",
            entry.filename,
            entry.published,
            entry.checksum
        );
        self.materialize(entry)
    }
}
