use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The conversational context of one turn, as handed over by the transport host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SessionContext {
    /// Conversation identifier assigned by the channel
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Directory object id of the sender, if the channel supplied one
    #[serde(default)]
    pub directory_object_id: Option<String>,
    /// Free-text question asked in this turn
    pub question: String,
}

impl SessionContext {
    /// The directory id, ignoring blank values.
    pub fn directory_id(&self) -> Option<&str> {
        self.directory_object_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// A resolved user. Lives for a single turn and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Directory object id the identity was resolved from
    pub object_id: String,
    /// Contact address used for authorization lookups
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_directory_id_is_treated_as_absent() {
        let ctx = SessionContext {
            conversation_id: None,
            directory_object_id: Some("   ".to_string()),
            question: "open orders".to_string(),
        };
        assert_eq!(ctx.directory_id(), None);
    }

    #[test]
    fn directory_id_is_trimmed() {
        let ctx = SessionContext {
            conversation_id: None,
            directory_object_id: Some(" 6f1c ".to_string()),
            question: String::new(),
        };
        assert_eq!(ctx.directory_id(), Some("6f1c"));
    }
}
