//! Webhook handling for GitHub events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA1)
//! - Classification of event payloads into evaluation triggers

pub mod ingest;
pub mod signature;

pub use ingest::{OpenPr, OpenPrSource, resolve_events};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_signature,
};
