//! HTTP request-tracking relay.
//!
//! Every request passing through the relay is translated into an analytics
//! beacon and delivered to the collector in the background, without holding
//! up the response.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod tracking;

pub use config::RelayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use tracking::{Tracker, TrackingContext};
