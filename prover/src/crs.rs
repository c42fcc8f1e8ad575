//! Reference string (CRS) loading.
//!
//! The transcript file is laid out as a 28-byte manifest, up to
//! [`MAX_POINTS`] G1 points of [`POINT_SIZE`] bytes, then a single
//! [`G2_SIZE`]-byte G2 point. A circuit of `n` gates needs `n + 1` G1
//! points and the G2 point, so loading is two byte-range reads at fixed
//! offsets. Every response is checked against the range it was asked for.

use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::CrsConfig;
use crate::error::CrsError;

pub const HEADER_SIZE: u64 = 28;
pub const POINT_SIZE: u64 = 64;
pub const MAX_POINTS: u64 = 5_040_000;
pub const G2_SIZE: u64 = 128;

/// A byte window into the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrsRange {
    pub offset: u64,
    pub length: u64,
}

impl CrsRange {
    /// Inclusive end offset, as used in HTTP `Range` headers.
    pub fn end(&self) -> u64 {
        self.offset + self.length - 1
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.offset, self.end())
    }
}

/// Range holding the G1 points for a circuit of `num_points` gates.
pub fn g1_range(num_points: u64) -> CrsRange {
    CrsRange {
        offset: HEADER_SIZE,
        length: (num_points + 1) * POINT_SIZE,
    }
}

/// Range holding the G2 point. Independent of circuit size.
pub fn g2_range() -> CrsRange {
    CrsRange {
        offset: HEADER_SIZE + MAX_POINTS * POINT_SIZE,
        length: G2_SIZE,
    }
}

pub fn manifest_range() -> CrsRange {
    CrsRange {
        offset: 0,
        length: HEADER_SIZE,
    }
}

/// The transcript header: seven big-endian `u32` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptManifest {
    pub transcript_number: u32,
    pub total_transcripts: u32,
    pub total_g1_points: u32,
    pub total_g2_points: u32,
    pub num_g1_points: u32,
    pub num_g2_points: u32,
    pub start_from: u32,
}

impl TranscriptManifest {
    pub fn parse(bytes: &[u8]) -> Result<Self, CrsError> {
        if bytes.len() != HEADER_SIZE as usize {
            return Err(CrsError::Manifest(format!(
                "expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        let mut fields = bytes
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]));
        let mut next = || {
            fields
                .next()
                .ok_or_else(|| CrsError::Manifest("truncated header".into()))
        };
        let manifest = Self {
            transcript_number: next()?,
            total_transcripts: next()?,
            total_g1_points: next()?,
            total_g2_points: next()?,
            num_g1_points: next()?,
            num_g2_points: next()?,
            start_from: next()?,
        };
        if manifest.total_transcripts == 0 || manifest.transcript_number >= manifest.total_transcripts {
            return Err(CrsError::Manifest(format!(
                "transcript {} of {}",
                manifest.transcript_number, manifest.total_transcripts
            )));
        }
        Ok(manifest)
    }
}

/// Source of transcript byte ranges.
pub trait RangeFetcher {
    /// Fetch exactly `range.length` bytes starting at `range.offset`.
    fn fetch(&self, range: CrsRange) -> impl Future<Output = Result<Vec<u8>, CrsError>> + Send;

    /// Human-readable origin, for logs and errors.
    fn source(&self) -> &str;
}

fn check_length(source: &str, range: CrsRange, actual: u64) -> Result<(), CrsError> {
    if actual != range.length {
        return Err(CrsError::Length {
            source_name: source.to_string(),
            start: range.offset,
            end: range.end(),
            expected: range.length,
            actual,
        });
    }
    Ok(())
}

/// Fetches ranges over HTTP with `Range` requests.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    url: String,
}

impl HttpFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    /// Use a preconfigured client (timeouts, proxies).
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn from_config(config: &CrsConfig) -> Self {
        Self::new(config.transcript_url.clone())
    }
}

impl RangeFetcher for HttpFetcher {
    async fn fetch(&self, range: CrsRange) -> Result<Vec<u8>, CrsError> {
        tracing::debug!(url = %self.url, range = %range.header_value(), "requesting CRS range");
        let request = self
            .client
            .get(&self.url)
            .header(header::RANGE, range.header_value())
            .build()
            .map_err(|source| CrsError::Request {
                url: self.url.clone(),
                source,
            })?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|source| CrsError::Fetch {
                url: self.url.clone(),
                source,
            })?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(CrsError::Status {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }
        if let Some(declared) = response.content_length() {
            check_length(&self.url, range, declared)?;
        }
        let body = response.bytes().await.map_err(|source| CrsError::Fetch {
            url: self.url.clone(),
            source,
        })?;
        check_length(&self.url, range, body.len() as u64)?;
        tracing::info!(url = %self.url, bytes = body.len(), "downloaded CRS range");
        Ok(body.to_vec())
    }

    fn source(&self) -> &str {
        &self.url
    }
}

/// Serves ranges from a transcript on local disk.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    path: PathBuf,
    name: String,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CrsError {
        CrsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl RangeFetcher for FileFetcher {
    async fn fetch(&self, range: CrsRange) -> Result<Vec<u8>, CrsError> {
        tracing::debug!(path = %self.name, range = %range.header_value(), "reading CRS range");
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.seek(SeekFrom::Start(range.offset))
            .await
            .map_err(|e| self.io_error(e))?;
        let mut buf = Vec::with_capacity(range.length as usize);
        file.take(range.length)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| self.io_error(e))?;
        check_length(&self.name, range, buf.len() as u64)?;
        Ok(buf)
    }

    fn source(&self) -> &str {
        &self.name
    }
}

/// G1 and G2 reference points for circuits of up to `num_points` gates.
///
/// Converts to and from bytes (bincode) so a downloaded CRS can be cached
/// and later extended with [`CrsLoader::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs {
    g1_data: Vec<u8>,
    g2_data: Vec<u8>,
    num_points: u64,
}

impl Crs {
    pub fn g1_data(&self) -> &[u8] {
        &self.g1_data
    }

    pub fn g2_data(&self) -> &[u8] {
        &self.g2_data
    }

    /// Largest gate count this CRS covers.
    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    /// Whether this CRS covers a circuit of `num_points` gates.
    pub fn covers(&self, num_points: u64) -> bool {
        !self.g2_data.is_empty() && self.g1_data.len() as u64 >= (num_points + 1) * POINT_SIZE
    }
}

impl Crs {
    fn check_shape(&self) -> Result<(), String> {
        if !self.g1_data.is_empty() && self.g1_data.len() as u64 != (self.num_points + 1) * POINT_SIZE {
            return Err(format!(
                "{} bytes of G1 data for {} points",
                self.g1_data.len(),
                self.num_points
            ));
        }
        if !self.g2_data.is_empty() && self.g2_data.len() as u64 != G2_SIZE {
            return Err(format!("{} bytes of G2 data", self.g2_data.len()));
        }
        Ok(())
    }
}

impl TryFrom<&[u8]> for Crs {
    type Error = CrsError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let crs: Crs = bincode::deserialize(bytes).map_err(CrsError::Deserialize)?;
        crs.check_shape()
            .map_err(|msg| CrsError::Deserialize(Box::new(bincode::ErrorKind::Custom(msg))))?;
        Ok(crs)
    }
}

impl TryFrom<Vec<u8>> for Crs {
    type Error = CrsError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<&Crs> for Vec<u8> {
    type Error = CrsError;

    fn try_from(crs: &Crs) -> Result<Self, Self::Error> {
        bincode::serialize(crs).map_err(CrsError::Serialize)
    }
}

/// Loads reference data through a [`RangeFetcher`].
#[derive(Debug, Clone)]
pub struct CrsLoader<F> {
    fetcher: F,
    max_points: u64,
}

impl<F: RangeFetcher> CrsLoader<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            max_points: MAX_POINTS,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch and parse the transcript manifest. Later loads are limited to
    /// the G1 points the transcript declares.
    pub async fn read_manifest(&mut self) -> Result<TranscriptManifest, CrsError> {
        let bytes = self.fetcher.fetch(manifest_range()).await?;
        let manifest = TranscriptManifest::parse(&bytes)?;
        self.max_points = u64::from(manifest.num_g1_points).min(MAX_POINTS);
        Ok(manifest)
    }

    fn check_points(&self, num_points: u64) -> Result<(), CrsError> {
        let requested = num_points.saturating_add(1);
        if requested > self.max_points {
            return Err(CrsError::TooManyPoints {
                requested,
                available: self.max_points,
            });
        }
        Ok(())
    }

    /// Fetch the CRS for a circuit of `num_points` gates. G1 is fetched
    /// before G2.
    pub async fn load(&self, num_points: u64) -> Result<Crs, CrsError> {
        self.check_points(num_points)?;
        let g1_data = self.fetcher.fetch(g1_range(num_points)).await?;
        let g2_data = self.fetcher.fetch(g2_range()).await?;
        tracing::info!(source = self.fetcher.source(), num_points, "loaded CRS");
        Ok(Crs {
            g1_data,
            g2_data,
            num_points,
        })
    }

    /// Extend `crs` to cover `num_points` gates, fetching only the G1
    /// points it does not already hold.
    pub async fn update(&self, crs: &mut Crs, num_points: u64) -> Result<(), CrsError> {
        self.check_points(num_points)?;
        if crs.g2_data.is_empty() {
            crs.g2_data = self.fetcher.fetch(g2_range()).await?;
        }
        let held = crs.g1_data.len() as u64;
        let needed = g1_range(num_points).length;
        if needed > held {
            let range = CrsRange {
                offset: HEADER_SIZE + held,
                length: needed - held,
            };
            let mut extra = self.fetcher.fetch(range).await?;
            crs.g1_data.append(&mut extra);
            crs.num_points = num_points;
            tracing::debug!(num_points, fetched = range.length, "extended CRS");
        }
        Ok(())
    }
}
