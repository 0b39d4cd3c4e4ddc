//! Removal confirmation.
//!
//! A removal request is accepted before the engine actually drops the
//! container. Teardown polls the runtime with exponential backoff until
//! none of the requested ids are listed any more.

use brewdock_common::config::RemovalPolicy;
use brewdock_common::error::{BrewdockError, Result};
use brewdock_common::types::ContainerId;

use crate::runtime::{ContainerFilter, ContainerRuntime};

/// Waits until every id in `ids` is gone from the runtime.
///
/// Ids still listed after a poll get their removal re-issued. Polling
/// starts at the policy's initial backoff and doubles up to its maximum.
///
/// # Errors
///
/// Returns [`BrewdockError::RemovalTimeout`] naming the ids still present
/// when the policy deadline expires, or a runtime error if listing fails.
pub async fn confirm_removed(
    runtime: &dyn ContainerRuntime,
    ids: &[ContainerId],
    policy: &RemovalPolicy,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + policy.timeout;
    let mut backoff = policy.initial_backoff;
    let mut pending: Vec<ContainerId> = ids.to_vec();

    loop {
        pending = still_listed(runtime, &pending).await?;
        if pending.is_empty() {
            return Ok(());
        }
        if tokio::time::Instant::now() + backoff > deadline {
            return Err(BrewdockError::RemovalTimeout {
                ids: pending.iter().map(ToString::to_string).collect(),
            });
        }
        tracing::debug!(
            pending = pending.len(),
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            "waiting for container removal"
        );
        tokio::time::sleep(backoff).await;
        backoff = policy.next_backoff(backoff);

        for id in &pending {
            match runtime.remove(id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(id = %id, error = %e, "re-issued removal failed"),
            }
        }
    }
}

async fn still_listed(
    runtime: &dyn ContainerRuntime,
    ids: &[ContainerId],
) -> Result<Vec<ContainerId>> {
    let mut present = Vec::new();
    for id in ids {
        if !runtime.list(&ContainerFilter::by_id(id)).await?.is_empty() {
            present.push(id.clone());
        }
    }
    Ok(present)
}
