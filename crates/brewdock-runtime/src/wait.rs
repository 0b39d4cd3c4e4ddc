//! Readiness probes for the Docker runtime.

use std::time::Duration;

use bollard::Docker;
use bollard::container::{InspectContainerOptions, LogOutput, LogsOptions};
use bollard::models::HealthStatusEnum;
use brewdock_common::error::{BrewdockError, Result};
use brewdock_compose::wait::{HttpWait, LogWait, WaitStrategy};
use futures::StreamExt;
use regex::Regex;

use crate::docker::published_port;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Blocks until `strategy` reports the container ready.
///
/// The strategy's own timeout applies, else `default_timeout`.
pub(crate) async fn wait_until_ready(
    docker: &Docker,
    id: &str,
    strategy: &WaitStrategy,
    default_timeout: Duration,
) -> Result<()> {
    let timeout = strategy.timeout().unwrap_or(default_timeout);
    tracing::info!(
        container = %id,
        strategy = strategy.kind(),
        timeout_secs = timeout.as_secs(),
        "waiting for container"
    );
    let probe = Probe::new(strategy)?;
    match tokio::time::timeout(timeout, probe.run(docker, id)).await {
        Ok(result) => result,
        Err(_) => Err(BrewdockError::runtime(
            "wait for",
            id,
            format!("{} strategy timed out after {}s", strategy.kind(), timeout.as_secs()),
        )),
    }
}

enum Probe<'a> {
    Log { pattern: Matcher, occurrence: usize },
    Http(&'a HttpWait),
    Health,
    Port(&'a str),
}

enum Matcher {
    Literal(String),
    Regex(Regex),
}

impl Matcher {
    fn count(&self, text: &str) -> usize {
        match self {
            Self::Literal(needle) => text.matches(needle.as_str()).count(),
            Self::Regex(re) => re.find_iter(text).count(),
        }
    }
}

impl<'a> Probe<'a> {
    fn new(strategy: &'a WaitStrategy) -> Result<Self> {
        Ok(match strategy {
            WaitStrategy::LogPattern(LogWait {
                log,
                occurrence,
                is_regexp,
                ..
            }) => {
                let pattern = if *is_regexp {
                    Matcher::Regex(Regex::new(log).map_err(|e| BrewdockError::Config {
                        message: format!("invalid log pattern \"{log}\": {e}"),
                    })?)
                } else {
                    Matcher::Literal(log.clone())
                };
                Self::Log {
                    pattern,
                    occurrence: (*occurrence).max(1),
                }
            }
            WaitStrategy::HttpCheck(http) => Self::Http(http),
            WaitStrategy::HealthCheck(_) => Self::Health,
            WaitStrategy::PortOpen(port) => Self::Port(&port.port),
        })
    }

    async fn run(&self, docker: &Docker, id: &str) -> Result<()> {
        loop {
            if self.check(docker, id).await? {
                tracing::debug!(container = %id, "container ready");
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn check(&self, docker: &Docker, id: &str) -> Result<bool> {
        match self {
            Self::Log {
                pattern,
                occurrence,
            } => Ok(pattern.count(&logs(docker, id).await?) >= *occurrence),
            Self::Http(http) => http_ready(docker, id, http).await,
            Self::Health => healthy(docker, id).await,
            Self::Port(port) => port_open(docker, id, port).await,
        }
    }
}

async fn logs(docker: &Docker, id: &str) -> Result<String> {
    let options = LogsOptions::<String> {
        stdout: true,
        stderr: true,
        ..Default::default()
    };
    let mut stream = docker.logs(id, Some(options));
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(LogOutput::StdOut { message } | LogOutput::StdErr { message } | LogOutput::Console { message }) => {
                out.push_str(&String::from_utf8_lossy(&message));
            }
            Ok(LogOutput::StdIn { .. }) => {}
            Err(e) => return Err(BrewdockError::runtime("read logs of", id, e)),
        }
    }
    Ok(out)
}

async fn host_port(docker: &Docker, id: &str, port: &str) -> Result<Option<u16>> {
    Ok(published_port(docker, id, port)
        .await?
        .and_then(|p| p.parse().ok()))
}

async fn http_ready(docker: &Docker, id: &str, http: &HttpWait) -> Result<bool> {
    let Some(port) = host_port(docker, id, &http.port).await? else {
        return Ok(false);
    };
    let scheme = if http.tls { "https" } else { "http" };
    let url = format!("{scheme}://127.0.0.1:{port}{}", http.path);
    let method = reqwest::Method::from_bytes(http.method.as_bytes()).map_err(|e| {
        BrewdockError::Config {
            message: format!("invalid HTTP method \"{}\": {e}", http.method),
        }
    })?;
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(http.tls)
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| BrewdockError::runtime("probe", &url, e))?;
    match client.request(method, &url).send().await {
        Ok(response) => Ok(response.status().as_u16() == http.status_code),
        Err(e) => {
            tracing::trace!(url = %url, error = %e, "probe not answered yet");
            Ok(false)
        }
    }
}

async fn healthy(docker: &Docker, id: &str) -> Result<bool> {
    let inspect = docker
        .inspect_container(id, None::<InspectContainerOptions>)
        .await
        .map_err(|e| BrewdockError::runtime("inspect container", id, e))?;
    let status = inspect
        .state
        .and_then(|state| state.health)
        .and_then(|health| health.status);
    match status {
        Some(HealthStatusEnum::HEALTHY) => Ok(true),
        Some(HealthStatusEnum::UNHEALTHY) => Err(BrewdockError::runtime(
            "wait for",
            id,
            "container reported unhealthy",
        )),
        _ => Ok(false),
    }
}

async fn port_open(docker: &Docker, id: &str, port: &str) -> Result<bool> {
    let Some(port) = host_port(docker, id, port).await? else {
        return Ok(false);
    };
    Ok(tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .is_ok())
}
