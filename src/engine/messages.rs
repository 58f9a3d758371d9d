//! Human-facing text: status wording, merge commit templating, comments.

use crate::config::{BodyStyle, BodyType, MessageConfig, TitleStyle};
use crate::types::{CommitAuthor, PullRequestFacts};

/// Renders a 1-based position as an English ordinal ("1st", "2nd", "11th").
pub fn ordinal(position: u64) -> String {
    let suffix = match (position % 10, position % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{position}{suffix}")
}

/// The merge commit title and body derived from the message configuration.
/// `None` means "let GitHub pick its default".
pub fn merge_message(
    config: &MessageConfig,
    pr: &PullRequestFacts,
    commit_authors: &[CommitAuthor],
) -> (Option<String>, Option<String>) {
    let title = match config.title {
        TitleStyle::GithubDefault => None,
        TitleStyle::PullRequestTitle => {
            if config.include_pr_number {
                Some(format!("{} (#{})", pr.title, pr.number))
            } else {
                Some(pr.title.clone())
            }
        }
    };

    let body = match config.body {
        BodyStyle::GithubDefault => None,
        BodyStyle::Empty => Some(String::new()),
        BodyStyle::PullRequestBody => {
            let mut body = match config.body_type {
                BodyType::Markdown => pr.body.clone(),
                BodyType::PlainText => pr.body_text.clone(),
                BodyType::Html => pr.body_html.clone(),
            };
            if config.include_coauthors {
                for trailer in coauthor_trailers(&pr.author, commit_authors) {
                    body.push('\n');
                    body.push_str(&trailer);
                }
            }
            Some(body)
        }
    };

    (title, body)
}

/// `Co-authored-by` trailers for every distinct commit author other than the
/// PR author.
fn coauthor_trailers(pr_author: &str, commit_authors: &[CommitAuthor]) -> Vec<String> {
    let mut seen = Vec::new();
    let mut trailers = Vec::new();
    for author in commit_authors {
        if author.login.as_deref() == Some(pr_author) || seen.contains(&&author.email) {
            continue;
        }
        seen.push(&author.email);
        trailers.push(format!(
            "Co-authored-by: {} <{}>",
            author.name, author.email
        ));
    }
    trailers
}

/// Comment posted when a PR hits a merge conflict with notification enabled.
pub fn conflict_comment(automerge_label: &str) -> String {
    format!(
        "This pull request currently has a merge conflict. Please resolve the \
         conflict and re-add the `{automerge_label}` label to retry the merge."
    )
}

/// Comment posted after GitHub returned a server error for the merge call.
pub fn merge_failure_comment(disable_bot_label: &str) -> String {
    format!(
        "GitHub returned a server error while merging this pull request. The \
         `{disable_bot_label}` label was added to stop automatic retries; remove \
         it once the problem is resolved to re-enable automerge."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MergeStateStatus, MergeableState, PullRequestState, Sha};

    fn pr() -> PullRequestFacts {
        PullRequestFacts {
            id: "PR_1".to_string(),
            number: 42,
            author: "alice".to_string(),
            labels: vec![],
            title: "Add widget support".to_string(),
            body: "**Adds** widgets.".to_string(),
            body_text: "Adds widgets.".to_string(),
            body_html: "<p><b>Adds</b> widgets.</p>".to_string(),
            merge_state_status: MergeStateStatus::Clean,
            mergeable: MergeableState::Mergeable,
            is_cross_repository: false,
            base_ref_name: "main".to_string(),
            head_ref_name: "widgets".to_string(),
            latest_sha: Sha::new("abc123"),
            state: PullRequestState::Open,
            is_draft: false,
        }
    }

    #[test]
    fn ordinals() {
        assert_eq!(ordinal(1), "1st");
        assert_eq!(ordinal(2), "2nd");
        assert_eq!(ordinal(3), "3rd");
        assert_eq!(ordinal(4), "4th");
        assert_eq!(ordinal(11), "11th");
        assert_eq!(ordinal(12), "12th");
        assert_eq!(ordinal(13), "13th");
        assert_eq!(ordinal(21), "21st");
        assert_eq!(ordinal(102), "102nd");
    }

    #[test]
    fn github_default_message_leaves_both_unset() {
        let (title, body) = merge_message(&MessageConfig::default(), &pr(), &[]);
        assert_eq!(title, None);
        assert_eq!(body, None);
    }

    #[test]
    fn pr_title_style_appends_number() {
        let config = MessageConfig {
            title: TitleStyle::PullRequestTitle,
            ..MessageConfig::default()
        };
        let (title, _) = merge_message(&config, &pr(), &[]);
        assert_eq!(title.as_deref(), Some("Add widget support (#42)"));

        let config = MessageConfig {
            title: TitleStyle::PullRequestTitle,
            include_pr_number: false,
            ..MessageConfig::default()
        };
        let (title, _) = merge_message(&config, &pr(), &[]);
        assert_eq!(title.as_deref(), Some("Add widget support"));
    }

    #[test]
    fn body_rendering_follows_body_type() {
        let config = MessageConfig {
            body: BodyStyle::PullRequestBody,
            body_type: BodyType::PlainText,
            ..MessageConfig::default()
        };
        let (_, body) = merge_message(&config, &pr(), &[]);
        assert_eq!(body.as_deref(), Some("Adds widgets."));
    }

    #[test]
    fn coauthor_trailers_skip_the_pr_author_and_duplicates() {
        let authors = vec![
            CommitAuthor {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                login: Some("alice".to_string()),
            },
            CommitAuthor {
                name: "Bob".to_string(),
                email: "bob@example.com".to_string(),
                login: Some("bob".to_string()),
            },
            CommitAuthor {
                name: "Bob".to_string(),
                email: "bob@example.com".to_string(),
                login: Some("bob".to_string()),
            },
        ];
        let config = MessageConfig {
            body: BodyStyle::PullRequestBody,
            include_coauthors: true,
            ..MessageConfig::default()
        };
        let (_, body) = merge_message(&config, &pr(), &authors);
        let body = body.unwrap();
        assert_eq!(
            body.matches("Co-authored-by: Bob <bob@example.com>").count(),
            1
        );
        assert!(!body.contains("alice@example.com"));
    }
}
