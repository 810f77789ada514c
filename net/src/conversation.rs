use crate::error::PeerResult;
use crate::wire::messages::ProtocolMessage;

/// What a handler wants to happen after processing one inbound message
/// (or before the first one arrives, via `initial_action`): zero or more
/// outbound messages, sent in order, and whether the conversation this
/// handler is running is now finished.
pub struct ConversationAction {
    pub messages: Vec<ProtocolMessage>,
    pub topic_finished: bool,
}

impl ConversationAction {
    pub fn nop() -> Self {
        ConversationAction { messages: vec![], topic_finished: false }
    }

    pub fn send(message: ProtocolMessage) -> Self {
        ConversationAction { messages: vec![message], topic_finished: false }
    }

    pub fn send_all(messages: Vec<ProtocolMessage>) -> Self {
        ConversationAction { messages, topic_finished: false }
    }

    pub fn finished() -> Self {
        ConversationAction { messages: vec![], topic_finished: true }
    }
}

pub trait ConversationTopicHandler {
    type Outcome;

    fn initial_action(&mut self) -> ConversationAction;
    fn on_message(&mut self, message: ProtocolMessage) -> PeerResult<ConversationAction>;
    /// The result of this conversation, once it's finished.
    fn outcome(self) -> PeerResult<Self::Outcome>;
}
