use parley_core::ids::{AgentId, MessageId};

/// Stamps dispatch events with the user message currently being answered.
/// There is never more than one candidate because only one request may be
/// active at a time.
pub struct DispatchCorrelator {
    user_message_id: MessageId,
}

/// A dispatch call ready to become a timeline entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelatedCall {
    pub agent_id: AgentId,
    pub query: String,
    pub user_message_id: MessageId,
}

/// A dispatch response ready to become a timeline entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelatedResponse {
    pub agent_id: AgentId,
    pub response: String,
    pub user_message_id: MessageId,
}

impl DispatchCorrelator {
    pub fn new(user_message_id: MessageId) -> Self {
        Self { user_message_id }
    }

    pub fn user_message_id(&self) -> &MessageId {
        &self.user_message_id
    }

    pub fn call(&self, agent_id: AgentId, query: String) -> CorrelatedCall {
        CorrelatedCall {
            agent_id,
            query,
            user_message_id: self.user_message_id.clone(),
        }
    }

    pub fn response(&self, agent_id: AgentId, response: String) -> CorrelatedResponse {
        CorrelatedResponse {
            agent_id,
            response,
            user_message_id: self.user_message_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_active_user_message() {
        let user_id = MessageId::new();
        let correlator = DispatchCorrelator::new(user_id.clone());

        let call = correlator.call(AgentId::from_raw("math-agent"), "2+2".into());
        assert_eq!(call.user_message_id, user_id);
        assert_eq!(call.agent_id.as_str(), "math-agent");

        let resp = correlator.response(AgentId::from_raw("math-agent"), "4".into());
        assert_eq!(resp.user_message_id, user_id);
        assert_eq!(resp.response, "4");
    }
}
