// The GraphQL snapshot fixture in the client tests is a single deeply
// nested json! literal; the default macro recursion limit is too small
// for it.
#![recursion_limit = "256"]

//! Automerge Bot - a GitHub App that keeps labeled pull requests up to date
//! and merges them when their branch protection requirements are met.
//!
//! The crate splits into an HTTP ingress ([`server`]), Redis-backed queues
//! with per-installation and per-branch workers ([`queue`], [`controller`]),
//! and a pure evaluation engine ([`engine`]) that decides what to do with a
//! snapshot of a pull request.

pub mod config;
pub mod controller;
pub mod engine;
pub mod github;
pub mod queue;
pub mod server;
pub mod types;
pub mod webhooks;
