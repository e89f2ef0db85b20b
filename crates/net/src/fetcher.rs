//! Cache-validating, resumable resource fetcher

use crate::sidecar::Sidecar;
use futures::StreamExt;
use reqwest::header::{self, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use std::time::Duration;
use steward_errors::{Error, NetworkError, Result};
use steward_events::{Event, EventSender, EventSenderExt};
use steward_types::ResourceKind;
use tokio::io::AsyncWriteExt;

/// Outcome of a fetch that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The destination file holds a fresh copy of the resource.
    Downloaded,
    /// The cached copy is still current (HTTP 304).
    NotModified,
}

/// Basic-auth credentials presented once on a 401 challenge.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Redirect policy. The default denies all redirects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedirectPolicy {
    #[default]
    Deny,
    All,
}

/// Minimum accepted TLS protocol version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MinTlsVersion {
    Tls10,
    #[default]
    Tls12,
    Tls13,
}

/// Per-call fetch options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub follow_redirects: RedirectPolicy,
    pub resume: bool,
    pub only_if_changed: bool,
    /// Connection timeout.
    pub timeout: Duration,
    pub min_tls: MinTlsVersion,
    pub credentials: Option<Credentials>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            follow_redirects: RedirectPolicy::default(),
            resume: false,
            only_if_changed: false,
            timeout: Duration::from_secs(60),
            min_tls: MinTlsVersion::default(),
            credentials: None,
        }
    }
}

/// HTTP fetcher bound to one repository root.
#[derive(Debug, Clone)]
pub struct Fetcher {
    repo_url: String,
    events: EventSender,
}

impl Fetcher {
    /// Create a fetcher for a repository root URL.
    #[must_use]
    pub fn new(repo_url: impl Into<String>, events: EventSender) -> Self {
        Self {
            repo_url: repo_url.into().trim_end_matches('/').to_string(),
            events,
        }
    }

    /// Fetch a named repository resource to a destination file.
    ///
    /// # Errors
    ///
    /// Returns a `NetworkError` describing the failure; HTTP 404
    /// surfaces as `NetworkError::Http { status: 404, .. }` so the
    /// resolver can drive primary-manifest fallback.
    pub async fn fetch(
        &self,
        kind: ResourceKind,
        name: &str,
        destination: &Path,
        options: &FetchOptions,
    ) -> Result<FetchOutcome> {
        let url = format!("{}/{}", self.repo_url, kind.remote_path(name));
        self.fetch_url(&url, destination, options).await
    }

    /// Fetch an absolute URL to a destination file.
    ///
    /// # Errors
    ///
    /// As [`fetch`](Self::fetch).
    pub async fn fetch_url(
        &self,
        url: &str,
        destination: &Path,
        options: &FetchOptions,
    ) -> Result<FetchOutcome> {
        reqwest::Url::parse(url)
            .map_err(|e| NetworkError::InvalidUrl(format!("{url}: {e}")))?;
        let client = build_client(options)?;

        let mut allow_resume = options.resume;
        loop {
            match self
                .attempt(&client, url, destination, options, allow_resume)
                .await
            {
                Err(Error::Network(NetworkError::ResumeMismatch { detail })) if allow_resume => {
                    // The partial on disk belongs to a different entity.
                    // Throw it away and restart from zero, exactly once.
                    let _ = tokio::fs::remove_file(destination).await;
                    Sidecar::remove(destination);
                    self.events.emit(Event::DownloadRestarted {
                        url: url.to_string(),
                        reason: detail,
                    });
                    allow_resume = false;
                }
                other => return other,
            }
        }
    }

    async fn attempt(
        &self,
        client: &Client,
        url: &str,
        destination: &Path,
        options: &FetchOptions,
        allow_resume: bool,
    ) -> Result<FetchOutcome> {
        let sidecar = Sidecar::read(destination);
        let resume_offset = if allow_resume {
            resume_offset(destination, sidecar.as_ref()).await
        } else {
            None
        };

        let build_request = |with_auth: bool| {
            let mut req = client.get(url);
            if let Some(offset) = resume_offset {
                req = req.header(header::RANGE, format!("bytes={offset}-"));
            } else if options.only_if_changed {
                // Only validate against a completed prior download.
                if let Some(prior) = sidecar.as_ref().filter(|s| s.expected_length.is_none()) {
                    if let Some(etag) = &prior.etag {
                        req = req.header(header::IF_NONE_MATCH, etag.as_str());
                    }
                    if let Some(last_modified) = &prior.last_modified {
                        req = req.header(header::IF_MODIFIED_SINCE, last_modified.as_str());
                    }
                }
            }
            if with_auth {
                if let Some(creds) = &options.credentials {
                    req = req.basic_auth(&creds.username, Some(&creds.password));
                }
            }
            req
        };

        let mut response = build_request(false)
            .send()
            .await
            .map_err(|e| classify_send_error(url, &e))?;

        // Present credentials once on challenge; a repeat challenge fails.
        if response.status() == StatusCode::UNAUTHORIZED && options.credentials.is_some() {
            response = build_request(true)
                .send()
                .await
                .map_err(|e| classify_send_error(url, &e))?;
        }

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            self.events.emit(Event::DownloadNotModified {
                url: url.to_string(),
            });
            return Ok(FetchOutcome::NotModified);
        }

        if status == StatusCode::PARTIAL_CONTENT {
            let Some(offset) = resume_offset else {
                // A 206 we never asked for.
                return Err(NetworkError::Http {
                    status: status.as_u16(),
                    url: url.to_string(),
                }
                .into());
            };
            let prior = sidecar.unwrap_or_default();
            verify_resume(&prior, &response, offset)?;
            let total = prior.expected_length_bytes().unwrap_or(0);

            self.events.emit(Event::DownloadResuming {
                url: url.to_string(),
                offset,
            });
            self.events.emit(Event::DownloadStarted {
                url: url.to_string(),
                size: Some(total),
            });

            let file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(destination)
                .await
                .map_err(|e| Error::io_with_path(&e, destination))?;
            let written = self.stream_body(response, file, url, offset, total).await?;

            let completed = Sidecar {
                expected_length: None,
                ..prior
            };
            completed
                .write(destination)
                .map_err(|e| Error::io_with_path(&e, destination))?;
            self.events.emit(Event::DownloadCompleted {
                url: url.to_string(),
                size: written,
            });
            return Ok(FetchOutcome::Downloaded);
        }

        if status.is_success() {
            let header_str = |name: header::HeaderName| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v: &HeaderValue| v.to_str().ok())
                    .map(str::to_string)
            };
            let fresh = Sidecar {
                etag: header_str(header::ETAG),
                last_modified: header_str(header::LAST_MODIFIED),
                expected_length: response.content_length().map(|n| n.to_string()),
            };
            let total = response.content_length().unwrap_or(0);

            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::io_with_path(&e, parent))?;
            }
            let file = tokio::fs::File::create(destination)
                .await
                .map_err(|e| Error::io_with_path(&e, destination))?;
            fresh
                .write(destination)
                .map_err(|e| Error::io_with_path(&e, destination))?;

            self.events.emit(Event::DownloadStarted {
                url: url.to_string(),
                size: response.content_length(),
            });
            let written = self.stream_body(response, file, url, 0, total).await?;

            let completed = Sidecar {
                expected_length: None,
                ..fresh
            };
            completed
                .write(destination)
                .map_err(|e| Error::io_with_path(&e, destination))?;
            self.events.emit(Event::DownloadCompleted {
                url: url.to_string(),
                size: written,
            });
            return Ok(FetchOutcome::Downloaded);
        }

        Err(NetworkError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        }
        .into())
    }

    async fn stream_body(
        &self,
        response: Response,
        mut file: tokio::fs::File,
        url: &str,
        mut downloaded: u64,
        total: u64,
    ) -> Result<u64> {
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| NetworkError::Io(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| NetworkError::Io(e.to_string()))?;
            downloaded += chunk.len() as u64;
            self.events.emit(Event::DownloadProgress {
                url: url.to_string(),
                bytes_downloaded: downloaded,
                total_bytes: total,
            });
        }
        file.flush()
            .await
            .map_err(|e| NetworkError::Io(e.to_string()))?;
        Ok(downloaded)
    }
}

/// Decide whether a partial download is eligible for a range request.
async fn resume_offset(destination: &Path, sidecar: Option<&Sidecar>) -> Option<u64> {
    let sidecar = sidecar?;
    let expected = sidecar.expected_length_bytes()?;
    if !sidecar.has_validator() {
        return None;
    }
    let len = tokio::fs::metadata(destination).await.ok()?.len();
    (len > 0 && len < expected).then_some(len)
}

/// A 206 is only acceptable when the server still serves the entity
/// the partial file came from.
fn verify_resume(prior: &Sidecar, response: &Response, offset: u64) -> Result<()> {
    let header_str = |name: header::HeaderName| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    if let Some(expected_etag) = &prior.etag {
        if header_str(header::ETAG).as_ref() != Some(expected_etag) {
            return Err(NetworkError::ResumeMismatch {
                detail: format!("etag changed from {expected_etag}"),
            }
            .into());
        }
    }
    if let Some(expected_lm) = &prior.last_modified {
        if header_str(header::LAST_MODIFIED).as_ref() != Some(expected_lm) {
            return Err(NetworkError::ResumeMismatch {
                detail: format!("last-modified changed from {expected_lm}"),
            }
            .into());
        }
    }
    let declared_total = response.content_length().map(|remaining| offset + remaining);
    if declared_total != prior.expected_length_bytes() {
        return Err(NetworkError::ResumeMismatch {
            detail: format!(
                "length changed: sidecar {:?}, server {declared_total:?}",
                prior.expected_length_bytes()
            ),
        }
        .into());
    }
    Ok(())
}

fn build_client(options: &FetchOptions) -> Result<Client> {
    let redirect = match options.follow_redirects {
        RedirectPolicy::Deny => reqwest::redirect::Policy::none(),
        RedirectPolicy::All => reqwest::redirect::Policy::limited(10),
    };
    let min_tls = match options.min_tls {
        MinTlsVersion::Tls10 => reqwest::tls::Version::TLS_1_0,
        MinTlsVersion::Tls12 => reqwest::tls::Version::TLS_1_2,
        MinTlsVersion::Tls13 => reqwest::tls::Version::TLS_1_3,
    };
    Client::builder()
        .connect_timeout(options.timeout)
        .redirect(redirect)
        .min_tls_version(min_tls)
        .build()
        .map_err(|e| Error::internal(format!("HTTP client construction failed: {e}")))
}

fn classify_send_error(url: &str, error: &reqwest::Error) -> Error {
    if error.is_timeout() {
        return NetworkError::Timeout {
            url: url.to_string(),
        }
        .into();
    }
    let mut detail = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        detail = format!("{detail}: {cause}");
        source = cause.source();
    }
    let lowered = detail.to_lowercase();
    if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("ssl") {
        NetworkError::Security(detail).into()
    } else if error.is_connect() {
        NetworkError::Connection {
            url: url.to_string(),
            detail,
        }
        .into()
    } else {
        NetworkError::Io(detail).into()
    }
}
