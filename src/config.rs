//! Bot configuration, parsed from the repository's TOML config file.
//!
//! The configuration is re-fetched on every evaluation and never cached: a
//! config push must take effect on the very next webhook. Parsing failures
//! are first-class states rather than errors, because the evaluation engine
//! reports them on the PR instead of crashing the worker.

use serde::{Deserialize, Serialize};

use crate::types::MergeMethod;

/// The config file path looked up in the repository's default branch.
pub const CONFIG_FILE_PATH: &str = ".automerge.toml";

/// The only supported config schema version.
pub const CONFIG_VERSION: u64 = 1;

/// Result of parsing a repository's config file.
///
/// Tri-state: the distinction between "not TOML" and "valid TOML, wrong
/// shape" matters for the diagnostic surfaced on the PR.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedConfig {
    Valid(Box<BotConfig>),
    /// Well-formed TOML that does not match the schema (bad version, wrong
    /// field type, unknown merge method...).
    SchemaError(String),
    /// Not valid TOML at all.
    ParseError(String),
}

impl ParsedConfig {
    /// Parses config file text.
    pub fn parse(text: &str) -> ParsedConfig {
        let value: toml::Value = match toml::from_str(text) {
            Ok(v) => v,
            Err(e) => return ParsedConfig::ParseError(e.to_string()),
        };
        let config: BotConfig = match value.try_into() {
            Ok(c) => c,
            Err(e) => return ParsedConfig::SchemaError(e.to_string()),
        };
        if config.version != CONFIG_VERSION {
            return ParsedConfig::SchemaError(format!(
                "expected version = {}, found {}",
                CONFIG_VERSION, config.version
            ));
        }
        ParsedConfig::Valid(Box::new(config))
    }
}

/// Top-level validated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    pub version: u64,

    /// When set, only the bot instance with this GitHub App ID acts on the
    /// repository. Guards against a fork of the bot racing the hosted one.
    #[serde(default)]
    pub app_id: Option<String>,

    /// Label that turns the bot off for a PR (also applied by the bot itself
    /// after a fatal merge failure).
    #[serde(default = "default_disable_bot_label")]
    pub disable_bot_label: String,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub update: UpdateConfig,

    #[serde(default)]
    pub approve: ApproveConfig,
}

fn default_disable_bot_label() -> String {
    "automerge-disabled".to_string()
}

/// `[merge]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MergeConfig {
    /// Label that opts a PR into automerge.
    pub automerge_label: String,

    /// When false, every open PR is a merge candidate.
    pub require_automerge_label: bool,

    /// PRs whose title matches are never merged. User-supplied, so it is
    /// compiled with a linear-time regex engine.
    pub blacklist_title_regex: String,

    /// PRs carrying any of these labels are never merged.
    pub blacklist_labels: Vec<String>,

    pub method: MergeMethod,

    /// Delete the head branch after merge (skipped when GitHub's own
    /// auto-delete is on, or for cross-repository PRs).
    pub delete_branch_on_merge: bool,

    /// Treat outstanding review requests as blocking.
    pub block_on_reviews_requested: bool,

    /// On merge conflict, remove the automerge label and explain in a comment.
    pub notify_on_conflict: bool,

    /// While merging, prefer updating the branch over waiting for checks.
    pub optimistic_updates: bool,

    /// Status check contexts to stop waiting on if they never complete.
    pub dont_wait_on_status_checks: Vec<String>,

    /// Update out-of-date branches as soon as they are queued, not only when
    /// they reach the front.
    pub update_branch_immediately: bool,

    /// Merge a fully-ready PR inline instead of queueing it.
    pub prioritize_ready_to_merge: bool,

    /// Evaluate and report, but never actually merge.
    pub do_not_merge: bool,

    pub message: MessageConfig,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            automerge_label: "automerge".to_string(),
            require_automerge_label: true,
            blacklist_title_regex: "^WIP.*".to_string(),
            blacklist_labels: Vec::new(),
            method: MergeMethod::Merge,
            delete_branch_on_merge: false,
            block_on_reviews_requested: false,
            notify_on_conflict: true,
            optimistic_updates: true,
            dont_wait_on_status_checks: Vec::new(),
            update_branch_immediately: false,
            prioritize_ready_to_merge: false,
            do_not_merge: false,
            message: MessageConfig::default(),
        }
    }
}

/// How the merge commit title is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleStyle {
    GithubDefault,
    PullRequestTitle,
}

/// How the merge commit body is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyStyle {
    GithubDefault,
    PullRequestBody,
    Empty,
}

/// Which rendering of the PR body to embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    Markdown,
    PlainText,
    Html,
}

/// `[merge.message]` section: merge commit templating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MessageConfig {
    pub title: TitleStyle,
    pub body: BodyStyle,
    pub include_pr_number: bool,
    pub body_type: BodyType,
    pub include_coauthors: bool,
}

impl Default for MessageConfig {
    fn default() -> Self {
        MessageConfig {
            title: TitleStyle::GithubDefault,
            body: BodyStyle::GithubDefault,
            include_pr_number: true,
            body_type: BodyType::Markdown,
            include_coauthors: false,
        }
    }
}

/// `[update]` section: branch update policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct UpdateConfig {
    /// Update out-of-date PRs even when not merging them.
    pub always: bool,

    /// Gate `always` behind the automerge label.
    pub require_automerge_label: bool,

    /// PR authors whose branches are never auto-updated.
    pub blacklist_usernames: Vec<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        UpdateConfig {
            always: false,
            require_automerge_label: true,
            blacklist_usernames: Vec::new(),
        }
    }
}

/// `[approve]` section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ApproveConfig {
    /// PRs from these authors (typically dependency-update bots) get an
    /// approval from the bot automatically.
    pub auto_approve_usernames: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_is_valid() {
        let parsed = ParsedConfig::parse("version = 1");
        match parsed {
            ParsedConfig::Valid(config) => {
                assert_eq!(config.version, 1);
                assert_eq!(config.merge.automerge_label, "automerge");
                assert!(config.merge.require_automerge_label);
                assert_eq!(config.merge.method, MergeMethod::Merge);
                assert!(config.app_id.is_none());
            }
            other => panic!("expected Valid, got {:?}", other),
        }
    }

    #[test]
    fn full_config_round_trips_fields() {
        let text = r#"
version = 1
app_id = "12345"
disable_bot_label = "bot-off"

[merge]
automerge_label = "ship-it"
require_automerge_label = false
blacklist_title_regex = "^DO NOT MERGE"
blacklist_labels = ["wip"]
method = "squash"
delete_branch_on_merge = true
block_on_reviews_requested = true
notify_on_conflict = false
optimistic_updates = false
dont_wait_on_status_checks = ["ci/flaky"]
update_branch_immediately = true
prioritize_ready_to_merge = true
do_not_merge = false

[merge.message]
title = "pull_request_title"
body = "pull_request_body"
include_pr_number = false
body_type = "plain_text"
include_coauthors = true

[update]
always = true
require_automerge_label = false
blacklist_usernames = ["renovate"]

[approve]
auto_approve_usernames = ["dependabot"]
"#;
        match ParsedConfig::parse(text) {
            ParsedConfig::Valid(config) => {
                assert_eq!(config.app_id.as_deref(), Some("12345"));
                assert_eq!(config.disable_bot_label, "bot-off");
                assert_eq!(config.merge.method, MergeMethod::Squash);
                assert_eq!(config.merge.dont_wait_on_status_checks, vec!["ci/flaky"]);
                assert_eq!(config.merge.message.title, TitleStyle::PullRequestTitle);
                assert_eq!(config.merge.message.body_type, BodyType::PlainText);
                assert!(config.update.always);
                assert_eq!(config.approve.auto_approve_usernames, vec!["dependabot"]);
            }
            other => panic!("expected Valid, got {:?}", other),
        }
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        assert!(matches!(
            ParsedConfig::parse("version = "),
            ParsedConfig::ParseError(_)
        ));
    }

    #[test]
    fn wrong_version_is_schema_error() {
        match ParsedConfig::parse("version = 2") {
            ParsedConfig::SchemaError(msg) => assert!(msg.contains("version")),
            other => panic!("expected SchemaError, got {:?}", other),
        }
    }

    #[test]
    fn unknown_merge_method_is_schema_error() {
        let text = "version = 1\n[merge]\nmethod = \"fast-forward\"";
        assert!(matches!(
            ParsedConfig::parse(text),
            ParsedConfig::SchemaError(_)
        ));
    }

    #[test]
    fn unknown_field_is_schema_error() {
        assert!(matches!(
            ParsedConfig::parse("version = 1\nunknown_field = true"),
            ParsedConfig::SchemaError(_)
        ));
    }
}
