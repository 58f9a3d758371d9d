//! Outbound GitHub API surface.
//!
//! Every call to GitHub goes through [`client::GitHubClient`], which routes
//! authentication through the installation token cache and paces requests
//! through the per-installation throttler.

pub mod client;
pub mod error;
pub mod throttle;
pub mod token;

pub use client::{GitHubClient, PrSnapshot};
pub use error::{GitHubApiError, GitHubErrorKind};
pub use throttle::Throttler;
pub use token::TokenCache;
