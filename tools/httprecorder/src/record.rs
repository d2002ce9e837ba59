//! The captured request/response exchange.

use crate::format::format_payload;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Header name → values, in the order they were sent.
pub type HeaderMap = BTreeMap<String, Vec<String>>;

/// One recorded HTTP exchange. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub method: String,
    /// Absolute URI or path-and-query as issued by the caller.
    pub target: String,
    #[serde(default)]
    pub request_headers: HeaderMap,
    #[serde(default)]
    pub request_body: String,
    pub status_code: u16,
    #[serde(default)]
    pub response_headers: HeaderMap,
    #[serde(default)]
    pub response_body: String,
}

impl InteractionRecord {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            request_headers: HeaderMap::new(),
            request_body: String::new(),
            status_code: 200,
            response_headers: HeaderMap::new(),
            response_body: String::new(),
        }
    }

    pub fn with_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_request_body(mut self, body: impl Into<String>) -> Self {
        self.request_body = body.into();
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_response_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.response_headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_response_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = body.into();
        self
    }

    /// Pretty-prints XML/JSON bodies so stored sessions are stable and readable.
    pub fn normalize_payloads(mut self) -> Self {
        self.request_body = format_payload(&self.request_body);
        self.response_body = format_payload(&self.response_body);
        self
    }

    /// Request header values, looked up case-insensitively.
    pub fn request_header(&self, name: &str) -> Option<&[String]> {
        self.request_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// First 8 bytes of the SHA-256 of the request body, hex encoded.
    pub fn request_body_digest(&self) -> String {
        let hash = Sha256::digest(self.request_body.as_bytes());
        hex_bytes(&hash[..8])
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
