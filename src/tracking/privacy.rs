//! Do-Not-Track handling.

use axum::http::HeaderName;

pub static DNT: HeaderName = HeaderName::from_static("dnt");

/// Whether tracking must be skipped for a request.
///
/// Only an exact `1` opts out; any other value, or no header, is tracked.
pub fn should_skip(dnt: Option<&str>, ignore_do_not_track: bool) -> bool {
    !ignore_do_not_track && dnt == Some("1")
}
