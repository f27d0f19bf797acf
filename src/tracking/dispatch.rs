//! Beacon finalization and fire-and-forget delivery.
//!
//! # Responsibilities
//! - Serialize custom variables into `cvar` / `_cvar`
//! - Send the beacon on a detached task so the host response never waits
//! - Log and count failed deliveries
//!
//! # Design Decisions
//! - No retries, no batching: a failed beacon is logged and dropped
//! - The spawned task owns its copy of the parameters
//! - Transport errors and non-success statuses are separate outcomes

use std::collections::HashMap;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::observability::metrics;
use crate::tracking::collector::Tracker;
use crate::tracking::context::TrackingState;
use crate::tracking::params::{BeaconParams, ACTION_VARS, VISITOR_VARS};

/// Errors that can occur while delivering a beacon.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// The collector answered with a non-success status.
    #[error("collector returned {0}")]
    Status(StatusCode),
}

/// Outbound HTTP capability used to reach the collector.
pub trait BeaconTransport: Send + Sync + 'static {
    /// Issue a GET to `url` and report the response status.
    fn get(&self, url: String) -> BoxFuture<'static, Result<StatusCode, DeliveryError>>;
}

/// Default transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl BeaconTransport for ReqwestTransport {
    fn get(&self, url: String) -> BoxFuture<'static, Result<StatusCode, DeliveryError>> {
        let client = self.client.clone();
        async move {
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;
            Ok(response.status())
        }
        .boxed()
    }
}

/// Turn the accumulated state into the final beacon, or `None` if vetoed.
pub fn finalize(state: TrackingState) -> Option<BeaconParams> {
    if state.ignored {
        return None;
    }

    let mut params = state.params;
    set_vars(&mut params, ACTION_VARS, &state.action_vars);
    set_vars(&mut params, VISITOR_VARS, &state.visitor_vars);
    Some(params)
}

fn set_vars(params: &mut BeaconParams, key: &str, vars: &HashMap<String, String>) {
    if vars.is_empty() {
        return;
    }
    match serde_json::to_string(vars) {
        Ok(json) => params.set(key, json),
        Err(e) => {
            tracing::warn!(param = key, error = %e, "Error serializing custom variables");
        }
    }
}

/// Send one beacon and check the collector's answer.
pub async fn deliver(transport: &dyn BeaconTransport, url: String) -> Result<(), DeliveryError> {
    let status = transport.get(url).await?;
    if status.is_success() {
        Ok(())
    } else {
        Err(DeliveryError::Status(status))
    }
}

/// Spawn the delivery of `params` on its own task.
///
/// Callers may drop the handle; the task runs to completion regardless.
pub fn dispatch(tracker: &Tracker, params: BeaconParams) -> JoinHandle<()> {
    let url = format!("{}{}", tracker.collector_base(), params.encode());
    let transport = tracker.transport();

    tokio::spawn(
        async move {
            match deliver(transport.as_ref(), url).await {
                Ok(()) => {
                    tracing::debug!("Beacon delivered");
                    metrics::record_beacon("sent");
                }
                Err(e @ DeliveryError::Transport(_)) => {
                    tracing::warn!(error = %e, "Error contacting collector");
                    metrics::record_beacon("failed");
                }
                Err(e @ DeliveryError::Status(_)) => {
                    tracing::warn!(error = %e, "Error contacting collector");
                    metrics::record_beacon("rejected");
                }
            }
        }
        .instrument(tracing::Span::current()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use crate::config::TrackingConfig;
    use crate::tracking::params::{ID_SITE, SEARCH};

    struct StubTransport {
        result: fn() -> Result<StatusCode, DeliveryError>,
        urls: Mutex<Vec<String>>,
    }

    impl BeaconTransport for StubTransport {
        fn get(&self, url: String) -> BoxFuture<'static, Result<StatusCode, DeliveryError>> {
            self.urls.lock().unwrap().push(url);
            let result = (self.result)();
            async move { result }.boxed()
        }
    }

    fn stub(result: fn() -> Result<StatusCode, DeliveryError>) -> Arc<StubTransport> {
        Arc::new(StubTransport {
            result,
            urls: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_finalize_vetoed() {
        let state = TrackingState {
            ignored: true,
            ..TrackingState::default()
        };
        assert!(finalize(state).is_none());
    }

    #[test]
    fn test_finalize_omits_empty_vars() {
        let mut state = TrackingState::default();
        state.params.set(ID_SITE, "1");

        let params = finalize(state).unwrap();
        assert!(!params.contains(ACTION_VARS));
        assert!(!params.contains(VISITOR_VARS));
    }

    #[test]
    fn test_finalize_serializes_vars() {
        let mut state = TrackingState::default();
        state.action_vars.insert("plan".into(), "pro".into());
        state.visitor_vars.insert("lang".into(), "de".into());

        let params = finalize(state).unwrap();
        assert_eq!(params.get(ACTION_VARS), Some(r#"{"plan":"pro"}"#));
        assert_eq!(params.get(VISITOR_VARS), Some(r#"{"lang":"de"}"#));
    }

    #[tokio::test]
    async fn test_deliver_outcomes() {
        let ok = stub(|| Ok(StatusCode::OK));
        assert!(deliver(ok.as_ref(), "http://x/piwik.php?".into()).await.is_ok());

        let rejected = stub(|| Ok(StatusCode::SERVICE_UNAVAILABLE));
        let err = deliver(rejected.as_ref(), "http://x/piwik.php?".into()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Status(StatusCode::SERVICE_UNAVAILABLE)));

        let down = stub(|| Err(DeliveryError::Transport("connection refused".into())));
        let err = deliver(down.as_ref(), "http://x/piwik.php?".into()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_dispatch_builds_collector_url() {
        let transport = stub(|| Ok(StatusCode::OK));
        let tracker = Tracker::new(
            &TrackingConfig {
                collector_url: "http://collector.test/".into(),
                ..TrackingConfig::default()
            },
            transport.clone(),
        );

        let mut params = BeaconParams::new();
        params.set(ID_SITE, "1");
        params.set(SEARCH, "red shoes");
        dispatch(&tracker, params).await.unwrap();

        let urls = transport.urls.lock().unwrap();
        assert_eq!(urls.as_slice(), ["http://collector.test/piwik.php?idsite=1&search=red+shoes"]);
    }

    /// Captures formatted log output for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    async fn dispatch_logged(result: fn() -> Result<StatusCode, DeliveryError>) -> String {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let tracker = Tracker::new(
            &TrackingConfig {
                collector_url: "http://collector.test".into(),
                ..TrackingConfig::default()
            },
            stub(result),
        );
        let mut params = BeaconParams::new();
        params.set(ID_SITE, "1");
        dispatch(&tracker, params).await.unwrap();

        logs.contents()
    }

    #[tokio::test]
    async fn test_dispatch_warns_on_failure() {
        let down = dispatch_logged(|| Err(DeliveryError::Transport("connection refused".into()))).await;
        assert_eq!(down.matches("Error contacting collector").count(), 1, "{}", down);
        assert!(down.contains("WARN"), "{}", down);
        assert!(down.contains("connection refused"), "{}", down);

        let rejected = dispatch_logged(|| Ok(StatusCode::BAD_GATEWAY)).await;
        assert_eq!(rejected.matches("Error contacting collector").count(), 1, "{}", rejected);
        assert!(rejected.contains("502"), "{}", rejected);

        let delivered = dispatch_logged(|| Ok(StatusCode::OK)).await;
        assert!(delivered.is_empty(), "{}", delivered);
    }
}
