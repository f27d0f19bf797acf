//! Tracking middleware.
//!
//! Wire with `axum::middleware::from_fn_with_state(tracker, tracking_middleware)`.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::observability::metrics;
use crate::tracking::collector::Tracker;
use crate::tracking::context::TrackingContext;
use crate::tracking::dispatch;
use crate::tracking::params::{build_base_params, RequestMeta};
use crate::tracking::privacy::{self, DNT};

pub async fn tracking_middleware(
    State(tracker): State<Arc<Tracker>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let dnt = request.headers().get(&DNT).and_then(|v| v.to_str().ok());
    if privacy::should_skip(dnt, tracker.ignore_do_not_track()) {
        tracing::debug!("Do-Not-Track set, skipping beacon");
        metrics::record_beacon("skipped");
        request.extensions_mut().insert(TrackingContext::skipped());
        return next.run(request).await;
    }

    let meta = RequestMeta::from_request(&request);
    let tracking = TrackingContext::new(build_base_params(&meta, &tracker));
    request.extensions_mut().insert(tracking.clone());

    let _pending = PendingBeacon {
        tracker,
        tracking,
        span: tracing::Span::current(),
    };
    next.run(request).await
}

/// Finalizes and dispatches the beacon when dropped.
///
/// Dropping happens once the chain returns or when the request future is
/// cancelled mid-handler (client gone, timeout), so either way the beacon is
/// sent exactly once.
struct PendingBeacon {
    tracker: Arc<Tracker>,
    tracking: TrackingContext,
    span: tracing::Span,
}

impl Drop for PendingBeacon {
    fn drop(&mut self) {
        let _entered = self.span.enter();

        // Collecting is finished; everything after this is asynchronous.
        let Some(params) = dispatch::finalize(self.tracking.take()) else {
            tracing::debug!("Beacon vetoed by handler");
            metrics::record_beacon("vetoed");
            return;
        };

        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("No runtime to dispatch beacon on, dropping it");
            metrics::record_beacon("failed");
            return;
        }
        dispatch::dispatch(&self.tracker, params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::tracking::dispatch::{BeaconTransport, DeliveryError};
    use crate::tracking::params::SEARCH;
    use axum::http::StatusCode;
    use futures_util::future::{BoxFuture, FutureExt};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingTransport {
        urls: Mutex<Vec<String>>,
    }

    impl BeaconTransport for CountingTransport {
        fn get(&self, url: String) -> BoxFuture<'static, Result<StatusCode, DeliveryError>> {
            self.urls.lock().unwrap().push(url);
            async { Ok(StatusCode::OK) }.boxed()
        }
    }

    fn pending(transport: Arc<CountingTransport>) -> (PendingBeacon, TrackingContext) {
        let config = TrackingConfig {
            collector_url: "http://collector.test".into(),
            site_id: "1".into(),
            ..TrackingConfig::default()
        };
        let tracker = Arc::new(Tracker::new(&config, transport));
        let tracking = TrackingContext::new(build_base_params(
            &RequestMeta::from_request(&Request::new(Body::empty())),
            &tracker,
        ));
        let guard = PendingBeacon {
            tracker,
            tracking: tracking.clone(),
            span: tracing::Span::none(),
        };
        (guard, tracking)
    }

    #[tokio::test]
    async fn test_drop_dispatches_once() {
        let transport = Arc::new(CountingTransport::default());
        let (guard, tracking) = pending(transport.clone());
        tracking.search("boots", Default::default());

        drop(guard);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let urls = transport.urls.lock().unwrap().clone();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].contains(&format!("{}=boots", SEARCH)), "{}", urls[0]);

        // The state was taken; later writes are inert.
        tracking.search("late", Default::default());
        assert!(tracking.is_ignored());
    }

    #[tokio::test]
    async fn test_drop_respects_veto() {
        let transport = Arc::new(CountingTransport::default());
        let (guard, tracking) = pending(transport.clone());
        tracking.ignore();

        drop(guard);
        tokio::task::yield_now().await;

        assert!(transport.urls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_outside_runtime_does_not_panic() {
        let transport = Arc::new(CountingTransport::default());
        let (guard, _tracking) = pending(transport.clone());

        drop(guard);
        assert!(transport.urls.lock().unwrap().is_empty());
    }
}
