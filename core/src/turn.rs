use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const DOCUMENT_OPEN_TAG: &str = "<context>";
pub const DOCUMENT_CLOSE_TAG: &str = "</context>";

/// Shown when permissions cannot be established (no identity, no partitions, lookup failure).
pub const PERMISSIONS_UNAVAILABLE_MESSAGE: &str =
    "We are unable to fetch your access permissions at the moment. Please try again later.";

/// Final payload of one conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TurnResult {
    /// Answer wrapped for downstream presentation, or empty
    pub output: String,
    /// Character count of the unwrapped answer
    pub length: usize,
    /// Reserved for a token-budget policy; always false today
    pub too_long: bool,
}

impl TurnResult {
    /// The explicit "no answer" marker.
    pub fn empty() -> Self {
        Self {
            output: String::new(),
            length: 0,
            too_long: false,
        }
    }

    /// Wraps an answer. Blank answers collapse to [`TurnResult::empty`].
    pub fn from_answer(answer: &str) -> Self {
        if answer.trim().is_empty() {
            return Self::empty();
        }
        Self {
            output: format_document(answer),
            length: answer.chars().count(),
            too_long: false,
        }
    }

    pub fn permissions_unavailable() -> Self {
        Self::from_answer(PERMISSIONS_UNAVAILABLE_MESSAGE)
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }
}

/// Wraps text in the fixed context tag pair. No other transformation.
pub fn format_document(text: &str) -> String {
    format!("{DOCUMENT_OPEN_TAG}{text}{DOCUMENT_CLOSE_TAG}")
}

/// Inverse of [`format_document`].
pub fn unwrap_document(document: &str) -> Option<&str> {
    document
        .strip_prefix(DOCUMENT_OPEN_TAG)?
        .strip_suffix(DOCUMENT_CLOSE_TAG)
}
