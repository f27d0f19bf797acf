//! Request tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → privacy.rs (DNT: skip entirely?)
//!     → params.rs (base beacon parameters from request metadata)
//!     → context.rs (TrackingContext attached for downstream handlers)
//!     → rest of the handler chain
//!     → dispatch.rs (cvar/_cvar, detached GET to the collector)
//! ```
//!
//! # Design Decisions
//! - The host response never waits on the collector
//! - Delivery failures are logged, never surfaced to the client
//! - Configuration is prepared once (collector.rs) and shared read-only

pub mod collector;
pub mod context;
pub mod dispatch;
pub mod middleware;
pub mod params;
pub mod privacy;

pub use collector::{normalize_collector_url, Tracker};
pub use context::{ignore_handler, SearchOptions, TrackingContext, TrackingState};
pub use dispatch::{BeaconTransport, DeliveryError, ReqwestTransport};
pub use middleware::tracking_middleware;
pub use params::{BeaconParams, RequestMeta, TlsConnection};
