//! Swagger-driven traffic generation for seeding capture logs

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{join_url, ClientRequest, HttpClient};
use crate::config::{is_excluded, GenerateConfig};
use crate::{Result, RetraceError};

/// Counts from one generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenerateSummary {
    /// Operations chosen for firing
    pub selected: usize,
    /// Requests that received a response, any status
    pub fired: usize,
    /// Operations dropped (parameterized or excluded)
    pub skipped: usize,
    /// Requests that failed at the transport level or timed out
    pub failed: usize,
}

#[derive(Debug, Clone)]
struct Operation {
    method: String,
    path: String,
}

/// Fire simple requests at the recording proxy for every eligible swagger
/// operation.
///
/// Both the proxy and (when configured) the source are probed first; an
/// unreachable one aborts before any traffic is fired. Per-request
/// failures are counted and the run continues.
///
/// # Errors
///
/// Returns error if the configuration or swagger document is invalid, or
/// a pre-flight health check fails
pub async fn run_generate(config: &GenerateConfig) -> Result<GenerateSummary> {
    config.validate()?;

    let swagger = load_swagger(&config.file)?;
    let (operations, skipped) = collect_operations(&swagger, config);

    let client = HttpClient::new();
    let timeout = Duration::from_millis(config.timeout_ms);

    check_reachable(&client, &config.target, "target", timeout).await?;
    if let Some(source) = &config.source {
        check_reachable(&client, source, "source", timeout).await?;
    }

    let selected = operations.len();
    info!("Firing {selected} operations at {}", config.target);

    let mut fired = 0usize;
    let mut failed = 0usize;
    let delay = Duration::from_millis(config.delay_ms);

    for (index, op) in operations.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let url = join_url(&config.target, &op.path);
        let request = ClientRequest {
            method: &op.method,
            url: &url,
            headers: &config.headers,
            body: &[],
        };

        match tokio::time::timeout(timeout, client.send(&request)).await {
            Ok(Ok(response)) => {
                debug!("{} {} -> {}", op.method, op.path, response.status);
                fired += 1;
            }
            Ok(Err(e)) => {
                warn!("{} {} failed: {e}", op.method, op.path);
                failed += 1;
            }
            Err(_) => {
                warn!("{} {} timed out", op.method, op.path);
                failed += 1;
            }
        }
    }

    info!("Traffic generation complete: {fired} fired, {failed} failed, {skipped} skipped");

    Ok(GenerateSummary {
        selected,
        fired,
        skipped,
        failed,
    })
}

/// Read and minimally validate the swagger document
fn load_swagger(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RetraceError::ConfigError(format!("Failed to read swagger file: {e}")))?;

    let doc: Value = serde_json::from_str(&content)
        .map_err(|e| RetraceError::ConfigError(format!("Failed to parse swagger file: {e}")))?;

    if !doc.get("paths").is_some_and(Value::is_object) {
        return Err(RetraceError::ConfigError(
            "Swagger document has no paths object".to_string(),
        ));
    }

    Ok(doc)
}

/// Select fireable operations: configured methods only, no parameterized
/// paths, exclusion list applied
fn collect_operations(swagger: &Value, config: &GenerateConfig) -> (Vec<Operation>, usize) {
    let methods: Vec<String> = config.methods.iter().map(|m| m.to_uppercase()).collect();
    let mut operations = Vec::new();
    let mut skipped = 0usize;

    let Some(paths) = swagger.get("paths").and_then(Value::as_object) else {
        return (operations, skipped);
    };

    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };

        for method_key in item.keys() {
            let method = method_key.to_uppercase();
            if !methods.contains(&method) {
                continue;
            }

            // Path templates need parameter values we do not have
            if path.contains('{') {
                debug!("Skipping parameterized path: {path}");
                skipped += 1;
                continue;
            }

            if is_excluded(path, &config.exclude) {
                info!("Skipping excluded path: {path}");
                skipped += 1;
                continue;
            }

            operations.push(Operation {
                method,
                path: format!("{}{path}", config.base_path),
            });
        }
    }

    (operations, skipped)
}

/// A probe counts any HTTP response as reachable; only transport failures
/// and timeouts abort
async fn check_reachable(
    client: &HttpClient,
    url: &str,
    what: &str,
    timeout: Duration,
) -> Result<()> {
    let request = ClientRequest {
        method: "GET",
        url,
        headers: &[],
        body: &[],
    };

    match tokio::time::timeout(timeout, client.send(&request)).await {
        Ok(Ok(response)) => {
            debug!("Health check {what} {url} -> {}", response.status);
            Ok(())
        }
        Ok(Err(e)) => Err(RetraceError::ConfigError(format!(
            "{what} is not reachable at {url}: {e}"
        ))),
        Err(_) => Err(RetraceError::ConfigError(format!(
            "{what} health check timed out at {url}"
        ))),
    }
}
