//! Remote data provider over HTTP.
//!
//! Fetches one wide CSV per (kind, year) from `{base_url}/{kind}/{year}.csv`
//! and coverage metadata from `{base_url}/coverage.json`. Transport failures
//! are retried with exponential backoff; everything else fails immediately.

use super::parse::parse_csv;
use super::provider::{RawDataProvider, RawDataset};
use super::retry::{AttemptError, RetryError, RetryPolicy};
use crate::coverage::{CoverageSource, CoverageTable, DatasetKind, YearCoverage};
use crate::error::DataError;
use reqwest::StatusCode;

/// Default provider endpoint root.
pub const DEFAULT_BASE_URL: &str = "https://data.vaschooldata.org/v1";

/// Data version tag used in cache keys unless configured otherwise.
pub const DEFAULT_DATA_VERSION: &str = "v1";

/// Why a single HTTP exchange failed without being worth a retry.
#[derive(Debug)]
enum Terminal {
    NotFound,
    Status(StatusCode),
    /// The request could not be built or followed (bad URL, redirect loop).
    Request(String),
}

pub struct HttpProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    retry: RetryPolicy,
    version: String,
}

impl HttpProvider {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(retry.timeout())
            .user_agent(concat!("vaschooldata/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            version: DEFAULT_DATA_VERSION.to_string(),
            base_url,
            retry,
        })
    }

    /// Override the data version tag used in cache keys.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn dataset_url(&self, kind: DatasetKind, year: i32) -> String {
        format!("{}/{kind}/{year}.csv", self.base_url)
    }

    pub fn coverage_url(&self) -> String {
        format!("{}/coverage.json", self.base_url)
    }

    /// GET `url` under the retry policy, returning the body bytes.
    fn get_with_retry(&self, url: &str) -> Result<Vec<u8>, RetryError<Terminal>> {
        self.retry.run(|attempt| {
            tracing::debug!(url, attempt, "GET");
            let resp = match self.client.get(url).send() {
                Ok(resp) => resp,
                // Malformed URLs and redirect loops fail the same way every time.
                Err(e) if e.is_builder() || e.is_redirect() => {
                    return Err(AttemptError::Fatal(Terminal::Request(e.to_string())))
                }
                Err(e) => return Err(AttemptError::Transient(e.to_string())),
            };

            let status = resp.status();
            if status == StatusCode::NOT_FOUND {
                return Err(AttemptError::Fatal(Terminal::NotFound));
            }
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                return Err(AttemptError::Transient(format!("HTTP {status}")));
            }
            if !status.is_success() {
                return Err(AttemptError::Fatal(Terminal::Status(status)));
            }

            // Status was fine, so a failed body read is the connection dropping
            // or stalling mid-transfer.
            resp.bytes()
                .map(|bytes| bytes.to_vec())
                .map_err(|e| AttemptError::Transient(format!("reading body: {e}")))
        })
    }
}

impl RawDataProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn fetch_raw(&self, year: i32, kind: DatasetKind) -> Result<RawDataset, DataError> {
        let url = self.dataset_url(kind, year);
        tracing::info!(%kind, year, %url, "fetching from provider");

        let body = self.get_with_retry(&url).map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => DataError::SourceUnavailable {
                kind,
                year,
                attempts,
                reason: last,
            },
            RetryError::Fatal {
                error: Terminal::NotFound,
                ..
            } => DataError::NotPublished { kind, year },
            RetryError::Fatal {
                attempts,
                error: Terminal::Status(status),
            } => DataError::SourceUnavailable {
                kind,
                year,
                attempts,
                reason: format!("HTTP {status}"),
            },
            RetryError::Fatal {
                attempts,
                error: Terminal::Request(reason),
            } => DataError::SourceUnavailable {
                kind,
                year,
                attempts,
                reason,
            },
        })?;

        let frame = parse_csv(&body, kind, year)?;
        Ok(RawDataset::new(kind, year, frame))
    }
}

impl CoverageSource for HttpProvider {
    fn coverage(&self, kind: DatasetKind) -> Result<YearCoverage, DataError> {
        let unavailable = |reason: String| DataError::CoverageUnavailable { kind, reason };

        let body = self.get_with_retry(&self.coverage_url()).map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => {
                unavailable(format!("{last} (after {attempts} attempts)"))
            }
            RetryError::Fatal { error, .. } => unavailable(format!("{error:?}")),
        })?;

        let table: CoverageTable = serde_json::from_slice(&body)
            .map_err(|e| unavailable(format!("malformed coverage metadata: {e}")))?;
        Ok(table.get(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            timeout_secs: 5,
        }
    }

    fn response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Announces a 1000-byte body, sends a few bytes, then hangs up.
    fn truncated() -> String {
        "HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nConnection: close\r\n\r\nlocale_id,loc".to_string()
    }

    const CSV: &str = "locale_id,locale_name,total_enrollment__TOTAL\n000,Virginia,1250000\n";

    /// Local server answering the n-th connection with `responses[n]` (the
    /// last response repeats). Returns the base URL and a connection counter.
    fn serve(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let n = counter.fetch_add(1, Ordering::SeqCst);

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }

                let reply = &responses[n.min(responses.len() - 1)];
                let _ = stream.write_all(reply.as_bytes());
                let _ = stream.flush();
            }
        });
        (url, connections)
    }

    #[test]
    fn urls_are_built_from_base() {
        let p = HttpProvider::new("https://example.org/data/", RetryPolicy::default()).unwrap();
        assert_eq!(
            p.dataset_url(DatasetKind::Enrollment, 2023),
            "https://example.org/data/enrollment/2023.csv"
        );
        assert_eq!(p.coverage_url(), "https://example.org/data/coverage.json");
        assert_eq!(p.version(), DEFAULT_DATA_VERSION);
        assert_eq!(p.with_version("2024-09").version(), "2024-09");
    }

    #[test]
    fn unreachable_host_surfaces_source_unavailable() {
        // Port 9 on localhost refuses connections; no external network needed.
        let p = HttpProvider::new("http://127.0.0.1:9", fast(2)).unwrap();
        match p.fetch_raw(2023, DatasetKind::Enrollment) {
            Err(DataError::SourceUnavailable { attempts, year, .. }) => {
                assert_eq!(attempts, 2);
                assert_eq!(year, 2023);
            }
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn unbuildable_request_fails_once_as_source_unavailable() {
        let p = HttpProvider::new("http://[::1", fast(3)).unwrap();
        match p.fetch_raw(2023, DatasetKind::Enrollment) {
            Err(DataError::SourceUnavailable { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn successful_fetch_is_parsed() {
        let (url, connections) = serve(vec![response("200 OK", CSV)]);
        let raw = HttpProvider::new(url, fast(3))
            .unwrap()
            .fetch_raw(2023, DatasetKind::Enrollment)
            .unwrap();
        assert_eq!(raw.height(), 1);
        assert_eq!(raw.end_year, 2023);
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_body_is_retried_then_source_unavailable() {
        let (url, connections) = serve(vec![truncated()]);
        let err = HttpProvider::new(url, fast(3))
            .unwrap()
            .fetch_raw(2023, DatasetKind::Enrollment)
            .unwrap_err();
        match err {
            DataError::SourceUnavailable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
        assert_eq!(connections.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn dropped_body_recovers_on_next_attempt() {
        let (url, connections) = serve(vec![truncated(), response("200 OK", CSV)]);
        let raw = HttpProvider::new(url, fast(3))
            .unwrap()
            .fetch_raw(2023, DatasetKind::Enrollment)
            .unwrap();
        assert_eq!(raw.height(), 1);
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn not_found_is_not_published_without_retry() {
        let (url, connections) = serve(vec![response("404 Not Found", "")]);
        let err = HttpProvider::new(url, fast(3))
            .unwrap()
            .fetch_raw(2019, DatasetKind::Graduation)
            .unwrap_err();
        assert!(matches!(err, DataError::NotPublished { year: 2019, .. }), "{err:?}");
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn server_errors_exhaust_the_retry_budget() {
        let (url, connections) = serve(vec![response("503 Service Unavailable", "")]);
        let err = HttpProvider::new(url, fast(3))
            .unwrap()
            .fetch_raw(2023, DatasetKind::Enrollment)
            .unwrap_err();
        match err {
            DataError::SourceUnavailable { attempts, reason, .. } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("503"), "{reason}");
            }
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
        assert_eq!(connections.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rate_limit_and_server_error_are_retried_until_success() {
        let (url, connections) = serve(vec![
            response("429 Too Many Requests", ""),
            response("500 Internal Server Error", ""),
            response("200 OK", CSV),
        ]);
        let raw = HttpProvider::new(url, fast(3))
            .unwrap()
            .fetch_raw(2023, DatasetKind::Enrollment)
            .unwrap();
        assert_eq!(raw.height(), 1);
        assert_eq!(connections.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn other_client_errors_fail_after_one_attempt() {
        let (url, connections) = serve(vec![response("403 Forbidden", "")]);
        let err = HttpProvider::new(url, fast(3))
            .unwrap()
            .fetch_raw(2023, DatasetKind::Enrollment)
            .unwrap_err();
        match err {
            DataError::SourceUnavailable { attempts, reason, .. } => {
                assert_eq!(attempts, 1);
                assert!(reason.contains("403"), "{reason}");
            }
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_payload_is_a_schema_error_without_retry() {
        let ragged = "locale_id,locale_name\n000,Virginia,extra\n";
        let (url, connections) = serve(vec![response("200 OK", ragged)]);
        let err = HttpProvider::new(url, fast(3))
            .unwrap()
            .fetch_raw(2023, DatasetKind::Enrollment)
            .unwrap_err();
        assert!(matches!(err, DataError::SchemaValidation { year: Some(2023), .. }), "{err:?}");
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn coverage_metadata_is_read_per_kind() {
        let body = r#"{"enrollment":{"min_year":2014,"max_year":2024},"graduation":{"min_year":2016,"max_year":2023}}"#;
        let (url, _) = serve(vec![response("200 OK", body)]);
        let cov = HttpProvider::new(url, fast(1))
            .unwrap()
            .coverage(DatasetKind::Graduation)
            .unwrap();
        assert_eq!((cov.min_year(), cov.max_year()), (2016, 2023));
    }

    #[test]
    fn malformed_coverage_is_coverage_unavailable() {
        let (url, _) = serve(vec![response("200 OK", "{\"enrollment\": 2014}")]);
        let err = HttpProvider::new(url, fast(1))
            .unwrap()
            .coverage(DatasetKind::Enrollment)
            .unwrap_err();
        match err {
            DataError::CoverageUnavailable { reason, .. } => {
                assert!(reason.contains("malformed"), "{reason}")
            }
            other => panic!("expected CoverageUnavailable, got {other:?}"),
        }

        let inverted_body = r#"{"enrollment":{"min_year":2030,"max_year":2010},"graduation":{"min_year":2016,"max_year":2024}}"#;
        let (url, _) = serve(vec![response("200 OK", inverted_body)]);
        let inverted = HttpProvider::new(url, fast(1))
            .unwrap()
            .coverage(DatasetKind::Graduation)
            .unwrap_err();
        assert!(matches!(inverted, DataError::CoverageUnavailable { .. }));
    }

    #[test]
    fn unreachable_metadata_is_coverage_unavailable() {
        let p = HttpProvider::new("http://127.0.0.1:9", fast(1)).unwrap();
        let err = p.coverage(DatasetKind::Graduation).unwrap_err();
        assert!(matches!(err, DataError::CoverageUnavailable { .. }));
    }
}
