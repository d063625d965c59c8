use anyhow::{Context, Result};
use hyper::Method;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::{debug, warn};

use crate::core::Core;

/// Split a `Name: value` header argument
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid header '{}', expected 'Name: value'", raw))?;

    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Invalid header '{}', name is empty", raw);
    }

    Ok((name.to_string(), value.trim().to_string()))
}

/// Send one signed request and print the response body to stdout
pub async fn cmd_request(
    core: &Core,
    method: Method,
    path: &str,
    data: Option<String>,
    headers: &[String],
) -> Result<()> {
    let headers = headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<Result<BTreeMap<_, _>>>()?;
    let headers = (!headers.is_empty()).then_some(headers);

    let path = normalize_path(path);
    let orchestrator = core.orchestrator();

    let response = match (method.clone(), data) {
        (Method::GET, _) => orchestrator.get(&path, headers).await,
        (Method::DELETE, _) => orchestrator.delete(&path, headers).await,
        (Method::POST, data) => orchestrator.post(&path, data.unwrap_or_default(), headers).await,
        (Method::PUT, data) => orchestrator.put(&path, data.unwrap_or_default(), headers).await,
        (method, data) => {
            orchestrator
                .request(method, &path, data.map(Into::into), headers)
                .await
        }
    }
    .context(format!("{} {} failed", method, path))?;

    debug!(
        status = response.status_code(),
        latency_ms = response.metrics.latency.as_millis() as u64,
        reused = response.metrics.reused,
        "Response received"
    );

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response.data)?;
    if !response.data.ends_with(b"\n") {
        writeln!(stdout)?;
    }

    if !response.is_success() {
        warn!(status = response.status_code(), path = %path, "Non-success status");
        anyhow::bail!("{} {} returned HTTP {}", method, path, response.status_code());
    }

    Ok(())
}

/// Print the orchestrator's health report as JSON
///
/// With `probe`, one GET is issued first so the report reflects live traffic.
pub async fn cmd_health(core: &Core, probe: Option<&str>) -> Result<()> {
    if let Some(path) = probe {
        let path = normalize_path(path);
        match core.orchestrator().get(&path, None).await {
            Ok(response) => debug!(status = response.status_code(), "Probe completed"),
            Err(e) => warn!(path = %path, error = %e, "Probe failed"),
        }
    }

    let report = core.orchestrator().health_check();
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize health report")?
    );

    Ok(())
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Accept: application/json").unwrap(),
            ("Accept".to_string(), "application/json".to_string())
        );
        assert_eq!(
            parse_header("x-trace:a:b").unwrap(),
            ("x-trace".to_string(), "a:b".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("papi/v1/groups"), "/papi/v1/groups");
        assert_eq!(normalize_path("/papi/v1/groups"), "/papi/v1/groups");
    }
}
