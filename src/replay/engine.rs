//! Replay orchestration: scheduling, comparison and event emission

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::capture::{read_capture_log, CapturedExchange};
use crate::client::{join_url, ClientRequest, ClientResponse, HttpClient};
use crate::config::{is_excluded, ReplayConfig};
use crate::replay::{
    diff, has_changes, normalize, parse_body, DiffSegment, Reporter, REPLAY_USER_AGENT,
};
use crate::{Result, RetraceError};

/// Outcome of replaying one captured exchange against both environments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayResult {
    /// 1-based position in the eligible record sequence
    pub id: usize,
    /// HTTP method
    pub method: String,
    /// Captured URL (path and query)
    pub url: String,
    /// Primary environment status
    pub status1: u16,
    /// Secondary environment status
    pub status2: u16,
    /// Primary environment latency in milliseconds
    pub time1: u64,
    /// Secondary environment latency in milliseconds
    pub time2: u64,
    /// Structural diff, present only when the bodies differ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Vec<DiffSegment>>,
    /// Verdict: normalized bodies identical and statuses equal
    #[serde(rename = "match")]
    pub is_match: bool,
}

/// Aggregate outcome of a replay run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Entries that produced a result
    pub total: usize,
    /// Matching entries
    pub passed: usize,
    /// Mismatching entries
    pub failed: usize,
    /// Report artifact path
    pub report: String,
}

/// Lifecycle events emitted during a replay run.
///
/// Delivery order: exactly one `Start`, then `Progress` and `Error` in
/// completion order, then exactly one `Complete`. A fatal configuration
/// failure emits a single `Error` and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    /// Run accepted; `total` counts replay-eligible records, including
    /// ones later skipped by exclusion
    Start {
        /// Eligible record count
        total: usize,
    },
    /// One entry finished with a verdict
    Progress {
        /// Entries finished so far
        current: usize,
        /// Eligible record count
        total: usize,
        /// The entry's outcome
        result: ReplayResult,
    },
    /// One entry failed, or a non-fatal run-level fault occurred
    Error {
        /// Human-readable description
        message: String,
    },
    /// Run finished; the report has been written
    Complete {
        /// Matching entries
        passed: usize,
        /// Mismatching entries
        failed: usize,
        /// Report artifact path
        report: String,
        /// All results, ordered by id
        results: Vec<ReplayResult>,
    },
}

/// Differential replay engine.
///
/// One engine owns one HTTP client; connections pool across entries.
pub struct ReplayEngine {
    client: Arc<HttpClient>,
}

impl ReplayEngine {
    /// Create an engine with a fresh client
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Arc::new(HttpClient::new()),
        }
    }

    /// Run a full differential replay.
    ///
    /// Entries are scheduled through a sliding window of at most
    /// `concurrency` in flight; per entry, both environments are queried
    /// concurrently with independent timeouts. Results are ordered by id
    /// regardless of completion order.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the capture log
    /// cannot be opened; per-entry failures become events instead
    pub async fn run(
        &self,
        config: ReplayConfig,
        events: mpsc::Sender<ReplayEvent>,
    ) -> Result<RunSummary> {
        let records = match load_eligible(&config).await {
            Ok(records) => records,
            Err(e) => {
                let _ = events
                    .send(ReplayEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return Err(e);
            }
        };

        let total = records.len();
        let _ = events.send(ReplayEvent::Start { total }).await;
        info!(
            "Replaying {total} captured exchanges, concurrency {}",
            config.concurrency
        );

        let config = Arc::new(config);

        // Ids are positional and assigned before exclusion, so excluding
        // an endpoint never renumbers the rest
        let mut scheduled = Vec::new();
        for (index, record) in records.into_iter().enumerate() {
            let id = index + 1;
            if is_excluded(&record.url, &config.exclude_endpoints) {
                info!(
                    "Skipping excluded endpoint: {} {}",
                    record.method, record.url
                );
                continue;
            }
            scheduled.push((id, record));
        }

        let entry_futures = scheduled.into_iter().map(|(id, record)| {
            let client = Arc::clone(&self.client);
            let cfg = Arc::clone(&config);
            async move { (id, replay_entry(&client, &cfg, id, record).await) }
        });

        let mut stream =
            futures_util::stream::iter(entry_futures).buffer_unordered(config.concurrency);

        let mut reporter = Reporter::new();
        let mut results = Vec::new();
        let mut current = 0usize;

        while let Some((id, outcome)) = stream.next().await {
            match outcome {
                Ok(result) => {
                    current += 1;
                    reporter.record(&result);
                    let _ = events
                        .send(ReplayEvent::Progress {
                            current,
                            total,
                            result: result.clone(),
                        })
                        .await;
                    results.push(result);
                }
                Err(e) => {
                    warn!("Replay entry {id} failed: {e}");
                    let _ = events
                        .send(ReplayEvent::Error {
                            message: format!("Entry {id}: {e}"),
                        })
                        .await;
                }
            }
        }

        results.sort_by_key(|r| r.id);

        let report = config.report_path.display().to_string();
        if let Err(e) = reporter.write_report(&config.report_path, &results).await {
            error!("Failed to write report: {e}");
            let _ = events
                .send(ReplayEvent::Error {
                    message: format!("Failed to write report: {e}"),
                })
                .await;
        }

        let summary = RunSummary {
            total: results.len(),
            passed: reporter.passed(),
            failed: reporter.failed(),
            report: report.clone(),
        };

        let _ = events
            .send(ReplayEvent::Complete {
                passed: summary.passed,
                failed: summary.failed,
                report,
                results,
            })
            .await;

        info!(
            "Replay complete: {} passed, {} failed",
            summary.passed, summary.failed
        );

        Ok(summary)
    }
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate the config and load replay-eligible records
async fn load_eligible(config: &ReplayConfig) -> Result<Vec<CapturedExchange>> {
    config.validate()?;
    read_capture_log(&config.log_path).await
}

/// Replay one record against both environments and compare
async fn replay_entry(
    client: &HttpClient,
    config: &ReplayConfig,
    id: usize,
    record: CapturedExchange,
) -> Result<ReplayResult> {
    let headers = build_headers(&config.inject_headers);
    let body = prepare_body(&record);
    let timeout = Duration::from_millis(config.request_timeout_ms);

    let url1 = join_url(&config.primary_url, &record.url);
    let url2 = join_url(&config.secondary_url, &record.url);

    let (first, second) = tokio::join!(
        timed_request(client, &record.method, &url1, &headers, &body, timeout),
        timed_request(client, &record.method, &url2, &headers, &body, timeout),
    );

    let (response1, time1) = first?;
    let (response2, time2) = second?;

    let body1 = normalize(&parse_body(&response1.body_text()), &config.ignore_fields);
    let body2 = normalize(&parse_body(&response2.body_text()), &config.ignore_fields);

    let segments = diff(&body1, &body2);
    let changed = has_changes(&segments);
    let is_match = !changed && response1.status == response2.status;

    debug!(
        "Entry {id}: {} {} -> {} / {} ({})",
        record.method,
        record.url,
        response1.status,
        response2.status,
        if is_match { "match" } else { "mismatch" }
    );

    Ok(ReplayResult {
        id,
        method: record.method,
        url: record.url,
        status1: response1.status,
        status2: response2.status,
        time1,
        time2,
        diff: changed.then_some(segments),
        is_match,
    })
}

/// Send one request with its own timeout, measuring elapsed time
async fn timed_request(
    client: &HttpClient,
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: &[u8],
    timeout: Duration,
) -> Result<(ClientResponse, u64)> {
    let request = ClientRequest {
        method,
        url,
        headers,
        body,
    };

    let started = Instant::now();
    let response = tokio::time::timeout(timeout, client.send(&request))
        .await
        .map_err(|_| {
            RetraceError::Upstream(format!(
                "Request timed out after {}ms: {url}",
                timeout.as_millis()
            ))
        })??;
    let elapsed = started.elapsed().as_millis() as u64;

    Ok((response, elapsed))
}

/// Built-in defaults merged under the injected headers; an injected header
/// wins over a default with the same name
fn build_headers(inject: &[(String, String)]) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("user-agent".to_string(), REPLAY_USER_AGENT.to_string()),
    ];

    for (name, value) in inject {
        if let Some(existing) = headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            existing.1 = value.clone();
        } else {
            headers.push((name.clone(), value.clone()));
        }
    }

    headers
}

/// Captured request bodies are re-serialized compactly when they parse as
/// JSON; anything else is sent verbatim
fn prepare_body(record: &CapturedExchange) -> Vec<u8> {
    if record.request_body.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(&record.request_body) {
        Ok(value) => value.to_string().into_bytes(),
        Err(e) => {
            warn!(
                "Request body for {} {} is not JSON ({e}), sending verbatim",
                record.method, record.url
            );
            record.request_body.clone().into_bytes()
        }
    }
}
