//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, TLS marker)
//!     → request.rs (request ID)
//!     → tracking middleware (beacon for every request)
//!     → server.rs relay handler (forward to upstream)
//!     → Send to client
//! ```

pub mod request;
pub mod server;

pub use request::{request_id_middleware, RequestId, X_REQUEST_ID};
pub use server::HttpServer;
