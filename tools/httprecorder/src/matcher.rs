//! Match key derivation.
//!
//! A [`RecordMatcher`] turns a record into the string that groups
//! interchangeable interactions. The store only ever talks to this trait, so
//! alternative policies can be swapped in without touching it.

use crate::record::InteractionRecord;
use std::collections::BTreeSet;
use url::Url;

/// Query parameters that usually carry per-run values (timestamps, SAS parts).
pub const DEFAULT_IGNORED_QUERY_PARAMS: &[&str] = &["t", "timestamp", "se", "st", "sig"];

const RELATIVE_BASE: &str = "http://recorder.invalid/";

pub trait RecordMatcher: Send + Sync {
    fn matching_key(&self, record: &InteractionRecord) -> String;
}

impl<F> RecordMatcher for F
where
    F: Fn(&InteractionRecord) -> String + Send + Sync,
{
    fn matching_key(&self, record: &InteractionRecord) -> String {
        self(record)
    }
}

/// `METHOD:path[?sorted remaining query][ header=values...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleMatcher {
    ignored_query_params: BTreeSet<String>,
    matched_headers: Vec<String>,
}

impl Default for SimpleMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_QUERY_PARAMS.iter().copied(), std::iter::empty::<&str>())
    }
}

impl SimpleMatcher {
    pub fn new<I, H>(ignored_query_params: I, matched_headers: H) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        H: IntoIterator,
        H::Item: AsRef<str>,
    {
        Self {
            ignored_query_params: ignored_query_params
                .into_iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
            matched_headers: matched_headers
                .into_iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    fn split_target(&self, target: &str) -> (String, Vec<String>) {
        let parsed = Url::parse(target)
            .or_else(|_| Url::parse(RELATIVE_BASE).and_then(|base| base.join(target)));
        let (path, query) = match &parsed {
            Ok(url) => (url.path().to_string(), url.query().unwrap_or_default().to_string()),
            Err(_) => {
                let without_fragment = target.split('#').next().unwrap_or_default();
                match without_fragment.split_once('?') {
                    Some((path, query)) => (path.to_string(), query.to_string()),
                    None => (without_fragment.to_string(), String::new()),
                }
            }
        };

        let mut params: Vec<String> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| {
                let name = pair.split('=').next().unwrap_or_default();
                !self.ignored_query_params.contains(&name.to_ascii_lowercase())
            })
            .map(str::to_string)
            .collect();
        params.sort_by(|a, b| param_name(a).cmp(param_name(b)));
        (path, params)
    }
}

fn param_name(pair: &str) -> &str {
    pair.split('=').next().unwrap_or_default()
}

impl RecordMatcher for SimpleMatcher {
    fn matching_key(&self, record: &InteractionRecord) -> String {
        let (path, params) = self.split_target(&record.target);
        let mut key = format!("{}:{path}", record.method.to_ascii_uppercase());
        if !params.is_empty() {
            key.push('?');
            key.push_str(&params.join("&"));
        }
        for name in &self.matched_headers {
            if let Some(values) = record.request_header(name) {
                key.push_str(&format!(" {name}={}", values.join(",")));
            }
        }
        key
    }
}

/// Distinguishes otherwise identical requests by what they sent.
#[derive(Debug, Clone)]
pub struct BodyDigestMatcher<M> {
    inner: M,
}

impl<M: RecordMatcher> BodyDigestMatcher<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<M: RecordMatcher> RecordMatcher for BodyDigestMatcher<M> {
    fn matching_key(&self, record: &InteractionRecord) -> String {
        let key = self.inner.matching_key(record);
        if record.request_body.is_empty() {
            key
        } else {
            format!("{key}#{}", record.request_body_digest())
        }
    }
}
