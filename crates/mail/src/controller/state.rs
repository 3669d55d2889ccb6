//! Observable inbox state

use std::collections::HashMap;

use crate::models::{Message, MessageId, Summary};

/// Where the inbox workflow currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Unauthenticated,
    Authenticating,
    Fetching,
    Analyzing,
    Ready,
}

impl Phase {
    /// True while a network step is running
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Phase::Authenticating | Phase::Fetching | Phase::Analyzing
        )
    }
}

/// Everything the presentation layer renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboxState {
    pub phase: Phase,
    pub messages: Vec<Message>,
    /// Keyed by message id; only ever holds ids present in `messages`
    pub summaries: HashMap<MessageId, Summary>,
    /// User-facing error overlay
    pub error: Option<String>,
    /// Refresh cycle that produced this state
    pub generation: u64,
}

impl InboxState {
    pub fn summary(&self, id: &MessageId) -> Option<&Summary> {
        self.summaries.get(id)
    }

    pub fn is_signed_in(&self) -> bool {
        !matches!(self.phase, Phase::Unauthenticated | Phase::Authenticating)
    }

    /// Messages still waiting for a summary
    pub fn unsummarized(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| !self.summaries.contains_key(&m.id))
            .count()
    }
}
