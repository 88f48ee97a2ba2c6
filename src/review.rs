//! Review workflow.
//!
//! Entries move through an explicit state machine:
//!
//! ```text
//! draft ──submit──▶ needs_review ──approve──▶ approved
//!   ▲                    │
//!   └──request changes───┘
//! ```
//!
//! Any other move, including leaving `approved`, is rejected. Approval needs
//! a reviewer and a clean quality evaluation of the entry as it is on disk.

use crate::quality::Finding;
use crate::types::{Entry, ReviewStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("{id}: cannot move from {from} to {to}")]
    IllegalTransition {
        id: String,
        from: ReviewStatus,
        to: ReviewStatus,
    },
    #[error("{id}: approval requires a reviewer")]
    MissingReviewer { id: String },
    #[error("{id}: quality gate failed ({} failure(s)): {}", failures.len(), failures.join("; "))]
    GateFailed { id: String, failures: Vec<String> },
}

/// Whether `from → to` is a legal move.
pub fn is_legal(from: ReviewStatus, to: ReviewStatus) -> bool {
    matches!(
        (from, to),
        (ReviewStatus::Draft, ReviewStatus::NeedsReview)
            | (ReviewStatus::NeedsReview, ReviewStatus::Approved)
            | (ReviewStatus::NeedsReview, ReviewStatus::Draft)
    )
}

/// A requested status change.
#[derive(Debug, Clone)]
pub struct Transition<'a> {
    pub to: ReviewStatus,
    pub reviewer: Option<&'a str>,
    pub notes: Option<&'a str>,
    /// RFC 3339 timestamp recorded as `reviewedAt` on approval.
    pub at: &'a str,
}

/// Apply a transition in place. Returns the previous status.
///
/// `findings` is the entry's current quality evaluation; it only matters for
/// approval. The entry is untouched when an error is returned.
pub fn apply(
    entry: &mut Entry,
    transition: &Transition<'_>,
    findings: &[Finding],
) -> Result<ReviewStatus, ReviewError> {
    let id = entry.id().to_string();
    let from = entry.review().status;
    let to = transition.to;
    if !is_legal(from, to) {
        return Err(ReviewError::IllegalTransition { id, from, to });
    }

    let reviewer = transition.reviewer.map(str::trim).filter(|r| !r.is_empty());
    if to == ReviewStatus::Approved {
        if reviewer.is_none() {
            return Err(ReviewError::MissingReviewer { id });
        }
        if !findings.is_empty() {
            return Err(ReviewError::GateFailed {
                id,
                failures: findings
                    .iter()
                    .map(|f| format!("[{}] {}", f.rule, f.message))
                    .collect(),
            });
        }
    }

    let review = entry.review_mut();
    review.status = to;
    if let Some(notes) = transition.notes {
        review.notes = Some(notes.to_string());
    }
    match to {
        ReviewStatus::Approved => {
            review.reviewer = reviewer.map(str::to_string);
            review.reviewed_at = Some(transition.at.to_string());
        }
        _ => {
            if let Some(r) = reviewer {
                review.reviewer = Some(r.to_string());
            }
        }
    }
    tracing::info!(entry = %id, %from, %to, "review status changed");
    Ok(from)
}
