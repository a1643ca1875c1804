//! Reachability gates: block until the deployment answers, within the
//! run's retry budget.

use tracing::info;
use vpnharness_core::{
    retry, CancelToken, HttpProbe, HttpResponse, RemoteShell, Result, RetryPolicy, SshSession,
    SshTarget,
};

use crate::runner::judge_http;
use crate::stage::HttpExpectation;

/// Retry `GET url` until the status matches exactly and the body contains
/// the expected substring. Transport errors, status and content mismatches
/// are all retryable.
pub async fn await_http(
    probe: &dyn HttpProbe,
    url: &str,
    expected: &HttpExpectation,
    policy: &RetryPolicy,
    cancel: Option<&CancelToken>,
) -> Result<HttpResponse> {
    let label = format!("GET {}", url);
    let response = retry(&label, policy, cancel, || async {
        let response = probe.get(url).await.map_err(|e| e.to_string())?;
        judge_http(response.status, &response.body, expected.status, &expected.body)?;
        Ok::<_, String>(response)
    })
    .await
    .map_err(|e| e.into_harness())?;

    info!(url, status = response.status, "Management UI reachable");
    Ok(response)
}

/// Retry the SSH handshake until it succeeds. Runs no command.
pub async fn await_ssh(
    shell: &dyn RemoteShell,
    target: &SshTarget,
    policy: &RetryPolicy,
    cancel: Option<&CancelToken>,
) -> Result<SshSession> {
    let label = format!("ssh {}", target.destination());
    let session = retry(&label, policy, cancel, || shell.connect(target))
        .await
        .map_err(|e| e.into_harness())?;

    info!(host = %target.host, "SSH reachable");
    Ok(session)
}
