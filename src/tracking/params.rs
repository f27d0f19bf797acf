//! Beacon parameter construction.
//!
//! Reads the metadata of an inbound request and turns it into the base
//! parameter set of a beacon. Absent headers become empty values, never
//! missing keys. The request target is copied as already-encoded text.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{header, uri::Scheme, HeaderMap, HeaderName, Request};
use url::form_urlencoded::byte_serialize;

use crate::tracking::collector::Tracker;

pub const ID_SITE: &str = "idsite";
pub const REC: &str = "rec";
pub const API_VERSION: &str = "apiv";
pub const URL: &str = "url";
pub const URL_REF: &str = "urlref";
pub const USER_AGENT: &str = "ua";
pub const LANG: &str = "lang";
pub const TOKEN_AUTH: &str = "token_auth";
pub const CLIENT_IP: &str = "cip";
pub const ACTION_VARS: &str = "cvar";
pub const VISITOR_VARS: &str = "_cvar";
pub const SEARCH: &str = "search";
pub const SEARCH_COUNT: &str = "search_count";
pub const SEARCH_CATEGORY: &str = "search_cat";

pub static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Marker inserted into request extensions when the connection was
/// TLS-terminated by this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsConnection;

/// The flattened key/value pairs of one beacon.
///
/// Keys are kept sorted so the encoded query is stable. Values are raw bytes
/// so header text that is not UTF-8 reaches the collector unaltered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeaconParams(BTreeMap<String, Vec<u8>>);

impl BeaconParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Value as text; `None` when absent or not UTF-8.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Encode as `application/x-www-form-urlencoded` query text.
    pub fn encode(&self) -> String {
        let mut query = String::new();
        for (key, value) in self.iter() {
            if !query.is_empty() {
                query.push('&');
            }
            query.extend(byte_serialize(key.as_bytes()));
            query.push('=');
            query.extend(byte_serialize(value));
        }
        query
    }
}

/// Owned snapshot of everything the builder reads from a request.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Path and query exactly as received.
    pub target: String,
    pub host: String,
    pub forwarded_proto: String,
    pub forwarded_host: String,
    pub tls: bool,
    /// Raw header bytes, passed on verbatim.
    pub referer: Vec<u8>,
    pub user_agent: Vec<u8>,
    pub accept_language: Vec<u8>,
    /// Client address as reported by proxies or the socket, possibly a
    /// comma-separated list.
    pub remote_addr: String,
}

impl RequestMeta {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let headers = request.headers();
        let uri = request.uri();

        let mut host = header_value(headers, &header::HOST);
        if host.is_empty() {
            // HTTP/2 carries the host in the :authority pseudo-header.
            if let Some(authority) = uri.authority() {
                host = authority.to_string();
            }
        }

        let tls = request.extensions().get::<TlsConnection>().is_some()
            || uri.scheme() == Some(&Scheme::HTTPS);

        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Self {
            target: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            host,
            forwarded_proto: header_value(headers, &X_FORWARDED_PROTO),
            forwarded_host: header_value(headers, &X_FORWARDED_HOST),
            tls,
            referer: header_bytes(headers, &header::REFERER),
            user_agent: header_bytes(headers, &header::USER_AGENT),
            accept_language: header_bytes(headers, &header::ACCEPT_LANGUAGE),
            remote_addr: remote_addr(headers, peer),
        }
    }

    /// Absolute URL of the visited page as the client saw it.
    pub fn visited_url(&self) -> String {
        let scheme = if !self.forwarded_proto.is_empty() {
            self.forwarded_proto.as_str()
        } else if self.tls {
            "https"
        } else {
            "http"
        };
        let host = if self.forwarded_host.is_empty() {
            &self.host
        } else {
            &self.forwarded_host
        };
        format!("{}://{}{}", scheme, host, self.target)
    }
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

fn header_bytes(headers: &HeaderMap, name: &HeaderName) -> Vec<u8> {
    headers
        .get(name)
        .map(|v| v.as_bytes().to_vec())
        .unwrap_or_default()
}

/// X-Real-IP, then X-Forwarded-For, then the socket peer.
fn remote_addr(headers: &HeaderMap, peer: Option<String>) -> String {
    let real_ip = header_value(headers, &X_REAL_IP);
    if !real_ip.is_empty() {
        return real_ip;
    }
    let forwarded_for = header_value(headers, &X_FORWARDED_FOR);
    if !forwarded_for.is_empty() {
        return forwarded_for;
    }
    peer.unwrap_or_default()
}

/// Client IP from a remote address that may list several proxies.
pub fn client_ip(remote: &str) -> String {
    if !remote.contains(',') && !remote.starts_with("::ffff:") {
        return remote.to_string();
    }
    let first = remote.split(',').next().unwrap_or_default().trim();
    first.strip_prefix("::ffff:").unwrap_or(first).to_string()
}

/// Build the parameters every beacon carries.
pub fn build_base_params(meta: &RequestMeta, tracker: &Tracker) -> BeaconParams {
    let mut params = BeaconParams::new();
    params.set(ID_SITE, tracker.site_id());
    params.set(REC, "1");
    params.set(URL, meta.visited_url());
    params.set(API_VERSION, "1");
    params.set(URL_REF, meta.referer.as_slice());
    params.set(USER_AGENT, meta.user_agent.as_slice());
    params.set(LANG, meta.accept_language.as_slice());
    params.set(TOKEN_AUTH, tracker.token());
    params.set(CLIENT_IP, client_ip(&meta.remote_addr));
    params
}
