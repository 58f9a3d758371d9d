//! Status-check classification against branch protection.
//!
//! Two generations of GitHub CI reporting feed in: commit statuses (older
//! API) and check runs (newer API). Both are flattened into passing /
//! failing / pending sets keyed by context name, then compared against the
//! branch protection rule's required contexts.
//!
//! Travis CI is special-cased: a protection rule requiring the bare
//! `continuous-integration/travis-ci` context is satisfied by either the
//! `/pr` or `/push` suffixed context passing, and failed by either failing.

use std::collections::BTreeSet;

use crate::types::{CheckConclusion, CheckRun, StatusContext, StatusState};

/// Prefix of the contexts the Travis alias quirk applies to.
const TRAVIS_CONTEXT: &str = "continuous-integration/travis-ci";

/// CI state flattened across both reporting APIs.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CheckClassification {
    pub passing: BTreeSet<String>,
    pub failing: BTreeSet<String>,
    pub pending: BTreeSet<String>,
    /// Contexts in the configured skip-list that are still incomplete.
    pub skippable: BTreeSet<String>,
}

/// Flattens statuses and check runs into outcome sets. `skip_list` is the
/// operator's `dont_wait_on_status_checks` configuration.
pub fn classify_checks(
    status_contexts: &[StatusContext],
    check_runs: &[CheckRun],
    skip_list: &[String],
) -> CheckClassification {
    let mut classified = CheckClassification::default();

    for status in status_contexts {
        let name = status.context.clone();
        match status.state {
            StatusState::Success => {
                classified.passing.insert(name);
            }
            StatusState::Error | StatusState::Failure => {
                classified.failing.insert(name);
            }
            StatusState::Pending | StatusState::Expected => {
                if skip_list.contains(&name) {
                    classified.skippable.insert(name.clone());
                }
                classified.pending.insert(name);
            }
        }
    }

    for check in check_runs {
        let name = check.name.clone();
        match check.conclusion {
            Some(
                CheckConclusion::Success | CheckConclusion::Neutral | CheckConclusion::Skipped,
            ) => {
                classified.passing.insert(name);
            }
            Some(
                CheckConclusion::ActionRequired
                | CheckConclusion::Cancelled
                | CheckConclusion::Failure
                | CheckConclusion::TimedOut,
            ) => {
                classified.failing.insert(name);
            }
            // A stale check run needs a re-run; treat it like one in flight.
            Some(CheckConclusion::Stale) | None => {
                if skip_list.contains(&name) {
                    classified.skippable.insert(name.clone());
                }
                classified.pending.insert(name);
            }
        }
    }

    classified
}

/// Whether the quirk applies to this required context.
fn is_travis_context(context: &str) -> bool {
    context.starts_with(TRAVIS_CONTEXT)
}

/// Whether a single required context is satisfied by the passing set,
/// honoring the Travis alias.
fn is_satisfied(required: &str, passing: &BTreeSet<String>) -> bool {
    if passing.contains(required) {
        return true;
    }
    is_travis_context(required)
        && (passing.contains(&format!("{required}/pr"))
            || passing.contains(&format!("{required}/push")))
}

/// The failing contexts that block merge: any failing context that is itself
/// required, plus any failing Travis-suffixed context whose bare name is
/// required. The returned names are the contexts that actually failed, for
/// accurate reporting.
pub fn failing_required(
    failing: &BTreeSet<String>,
    required: &[String],
) -> BTreeSet<String> {
    let mut blocking = BTreeSet::new();
    for context in failing {
        if required.iter().any(|r| r == context) {
            blocking.insert(context.clone());
            continue;
        }
        for suffix in ["/pr", "/push"] {
            if let Some(base) = context.strip_suffix(suffix)
                && is_travis_context(base)
                && required.iter().any(|r| r == base)
            {
                blocking.insert(context.clone());
            }
        }
    }
    blocking
}

/// Required contexts not yet satisfied, excluding the configured skip-list.
pub fn missing_required(
    required: &[String],
    passing: &BTreeSet<String>,
    skip_list: &[String],
) -> BTreeSet<String> {
    required
        .iter()
        .filter(|context| !skip_list.contains(context) && !is_satisfied(context, passing))
        .cloned()
        .collect()
}
