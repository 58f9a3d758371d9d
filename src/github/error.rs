//! GitHub API error types.
//!
//! This module distinguishes transient from permanent GitHub API failures.
//! The distinction drives retry behavior:
//!
//! - **Transient** errors are retried within the per-evaluation budget
//!   (5xx, rate limits, network failures)
//! - **Permanent** errors are surfaced immediately (most 4xx)
//!
//! An HTTP 500 specifically on the merge call is handled above this layer:
//! the evaluation engine treats it as fatal and disables itself on the PR
//! rather than retrying.

use std::fmt;
use thiserror::Error;

/// The kind of GitHub API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// Safe to retry with a delay: 5xx, 429, rate-limited 403, network
    /// failures.
    Transient,

    /// Requires a different request or human intervention: most 4xx,
    /// authentication failures, missing resources.
    Permanent,
}

impl GitHubErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A GitHub API error with the diagnostics the retry reporter accumulates.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,

    /// The call that failed, e.g. `"PUT pulls/42/merge"`. Surfaced in the
    /// "problem contacting GitHub API" status when retries run out.
    pub method: String,

    pub status_code: Option<u16>,

    /// Response body (or transport error text), truncated for reporting.
    pub body: String,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} failed (HTTP {}): {}", self.method, code, self.body),
            None => write!(f, "{} failed: {}", self.method, self.body),
        }
    }
}

/// Response bodies can be large; keep enough for diagnostics.
const MAX_BODY_LEN: usize = 1024;

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_BODY_LEN {
        return body.to_string();
    }
    let mut end = MAX_BODY_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

impl GitHubApiError {
    /// Categorizes an HTTP response status.
    pub fn from_response(method: impl Into<String>, status: u16, body: &str) -> Self {
        let kind = match status {
            429 => GitHubErrorKind::Transient,
            403 if is_rate_limit_body(body) => GitHubErrorKind::Transient,
            500..=599 => GitHubErrorKind::Transient,
            _ => GitHubErrorKind::Permanent,
        };
        GitHubApiError {
            kind,
            method: method.into(),
            status_code: Some(status),
            body: truncate_body(body),
        }
    }

    /// Wraps a transport-level failure (connect, DNS, timeout). Always
    /// transient.
    pub fn from_transport(method: impl Into<String>, err: &reqwest::Error) -> Self {
        GitHubApiError {
            kind: GitHubErrorKind::Transient,
            method: method.into(),
            status_code: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }

    /// A permanent error with no HTTP exchange behind it (e.g. bad key
    /// material).
    pub fn permanent(method: impl Into<String>, message: impl Into<String>) -> Self {
        GitHubApiError {
            kind: GitHubErrorKind::Permanent,
            method: method.into(),
            status_code: None,
            body: message.into(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }

    /// True for an HTTP 500 specifically. The merge call treats a 500 as
    /// fatal because the merge may have half-applied; other 5xx responses
    /// stay in the transient-retry path.
    pub fn is_internal_server_error(&self) -> bool {
        self.status_code == Some(500)
    }
}

/// GitHub reports rate limiting both via 429 and via 403 with a telltale body.
fn is_rate_limit_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("rate limit") || lower.contains("abuse detection")
}
