//! Review folding for branch-protection accounting.
//!
//! GitHub's review list contains every submission, in order. Branch
//! protection cares only about each reviewer's latest actionable verdict:
//! a reviewer who requested changes and later approved counts as approving,
//! and a dismissal erases their standing verdict entirely. Reviews from
//! authors without write access never count.

use crate::types::{Review, ReviewState};

/// Whether a review state changes a reviewer's standing verdict.
fn is_actionable(state: ReviewState) -> bool {
    matches!(
        state,
        ReviewState::Approved | ReviewState::ChangesRequested | ReviewState::Dismissed
    )
}

/// Folds `reviews` (in submission order) down to the latest actionable state
/// per author, keeping only authors whose permission counts toward branch
/// protection. Output order follows each author's first actionable review.
pub fn latest_actionable_reviews(reviews: &[Review]) -> Vec<Review> {
    let mut folded: Vec<Review> = Vec::new();
    for review in reviews {
        if !review.author_permission.can_approve() || !is_actionable(review.state) {
            continue;
        }
        match folded.iter_mut().find(|r| r.author == review.author) {
            Some(existing) => existing.state = review.state,
            None => folded.push(review.clone()),
        }
    }
    folded
}

/// Authors whose standing verdict is "changes requested".
pub fn changes_requested_by(folded: &[Review]) -> Vec<&str> {
    folded
        .iter()
        .filter(|r| r.state == ReviewState::ChangesRequested)
        .map(|r| r.author.as_str())
        .collect()
}

/// The number of standing approvals.
pub fn approval_count(folded: &[Review]) -> u32 {
    folded
        .iter()
        .filter(|r| r.state == ReviewState::Approved)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Permission;

    fn review(author: &str, state: ReviewState, permission: Permission) -> Review {
        Review {
            author: author.to_string(),
            state,
            author_permission: permission,
        }
    }

    #[test]
    fn later_approval_supersedes_changes_requested() {
        let folded = latest_actionable_reviews(&[
            review("alice", ReviewState::ChangesRequested, Permission::Write),
            review("alice", ReviewState::Approved, Permission::Write),
        ]);
        assert_eq!(approval_count(&folded), 1);
        assert!(changes_requested_by(&folded).is_empty());
    }

    #[test]
    fn dismissal_erases_a_standing_verdict() {
        let folded = latest_actionable_reviews(&[
            review("alice", ReviewState::ChangesRequested, Permission::Write),
            review("alice", ReviewState::Dismissed, Permission::Write),
        ]);
        assert_eq!(approval_count(&folded), 0);
        assert!(changes_requested_by(&folded).is_empty());
    }

    #[test]
    fn comments_do_not_change_the_verdict() {
        let folded = latest_actionable_reviews(&[
            review("alice", ReviewState::Approved, Permission::Write),
            review("alice", ReviewState::Commented, Permission::Write),
        ]);
        assert_eq!(approval_count(&folded), 1);
    }

    #[test]
    fn read_permission_reviews_never_count() {
        let folded = latest_actionable_reviews(&[
            review("drive-by", ReviewState::Approved, Permission::Read),
            review("triager", ReviewState::ChangesRequested, Permission::Triage),
        ]);
        assert!(folded.is_empty());
    }

    #[test]
    fn distinct_authors_accumulate() {
        let folded = latest_actionable_reviews(&[
            review("alice", ReviewState::Approved, Permission::Admin),
            review("bob", ReviewState::ChangesRequested, Permission::Write),
            review("carol", ReviewState::Approved, Permission::Maintain),
        ]);
        assert_eq!(approval_count(&folded), 2);
        assert_eq!(changes_requested_by(&folded), vec!["bob"]);
    }
}
