//! Retry-from-message: rewind the timeline to a prior user message and
//! resend its text as a fresh request under a fresh conversation id, so the
//! backend answers without context from the discarded suffix.

use std::sync::Arc;

use parley_core::errors::TimelineError;
use parley_core::ids::MessageId;
use parley_core::timeline::Role;
use tracing::instrument;

use crate::controller::SessionController;
use crate::error::SessionError;

pub struct RetryController {
    controller: Arc<SessionController>,
}

impl RetryController {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self { controller }
    }

    /// Rewind to `message_id` and resend it. The target must be a user
    /// message and no request may be in flight. On success the timeline
    /// holds a fresh copy of the message with a new id, which is returned.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn retry_from(&self, message_id: &MessageId) -> Result<MessageId, SessionError> {
        if self.controller.is_active() {
            return Err(SessionError::Busy);
        }

        // Capture and truncate under one lock so no events interleave.
        let content = {
            let mut timeline = self.controller.timeline().lock();
            let message = timeline
                .message(message_id)
                .ok_or_else(|| TimelineError::NotFound(message_id.to_string()))?;
            if message.role != Role::User {
                return Err(TimelineError::NotUserMessage(message_id.to_string()).into());
            }
            let content = message.content.clone();
            timeline.truncate_from(message_id)?;
            content
        };

        let conversation_id = self.controller.reset_conversation();
        tracing::debug!(conversation_id = %conversation_id, "Resending after rewind");
        self.controller.send(content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::broadcast;

    use crate::controller::SessionConfig;
    use parley_core::events::{Phase, SessionEvent};
    use parley_core::wire::StreamChunk;
    use parley_transport::{MockReply, MockTransport};

    fn session(replies: Vec<MockReply>) -> (Arc<MockTransport>, Arc<SessionController>, RetryController) {
        let mock = Arc::new(MockTransport::new(replies));
        let ctrl = Arc::new(SessionController::new(mock.clone(), SessionConfig::default()));
        let retry = RetryController::new(ctrl.clone());
        (mock, ctrl, retry)
    }

    async fn wait_for_idle(rx: &mut broadcast::Receiver<SessionEvent>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::PhaseChanged { phase: Phase::Idle, .. }) => return,
                    Ok(_) => {}
                    Err(e) => panic!("event channel closed: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for idle");
    }

    #[tokio::test]
    async fn retry_rewinds_and_resends() {
        let (mock, ctrl, retry) = session(vec![
            MockReply::streamed(&[], "first answer"),
            MockReply::Chunks(vec![
                StreamChunk::dispatch_call("math-agent", "2+2"),
                StreamChunk::dispatch_response("math-agent", "4"),
                StreamChunk::completed("second answer"),
            ]),
            MockReply::streamed(&[], "retried answer"),
        ]);

        let mut rx = ctrl.subscribe();
        ctrl.send("one").await.unwrap();
        wait_for_idle(&mut rx).await;
        let second_id = ctrl.send("two").await.unwrap();
        wait_for_idle(&mut rx).await;

        let before = ctrl.snapshot();
        assert_eq!(before.messages().len(), 4);
        assert_eq!(before.calls().len(), 1);
        assert_eq!(before.responses().len(), 1);
        let old_conversation = ctrl.conversation_id();

        let new_id = retry.retry_from(&second_id).await.unwrap();
        assert_ne!(new_id, second_id);
        wait_for_idle(&mut rx).await;

        assert_ne!(ctrl.conversation_id(), old_conversation);
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.last_request().unwrap().query, "two");

        let after = ctrl.snapshot();
        assert_eq!(after.messages().len(), 4);
        assert_eq!(after.messages()[2].id, new_id);
        assert_eq!(after.messages()[2].content, "two");
        assert_eq!(after.messages()[3].content, "retried answer");
        // Dispatches tied to the discarded exchange are gone.
        assert!(after.calls().is_empty());
        assert!(after.responses().is_empty());
    }

    #[tokio::test]
    async fn retry_unknown_message_rejected() {
        let (_, _ctrl, retry) = session(vec![]);
        let result = retry.retry_from(&MessageId::new()).await;
        assert!(matches!(
            result,
            Err(SessionError::Timeline(TimelineError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn retry_non_user_message_rejected() {
        let (_, ctrl, retry) = session(vec![MockReply::streamed(&[], "answer")]);

        let mut rx = ctrl.subscribe();
        ctrl.send("question").await.unwrap();
        wait_for_idle(&mut rx).await;

        let snapshot = ctrl.snapshot();
        let assistant_id = snapshot.messages()[1].id.clone();
        let result = retry.retry_from(&assistant_id).await;
        assert!(matches!(
            result,
            Err(SessionError::Timeline(TimelineError::NotUserMessage(_)))
        ));
        // Timeline untouched by the rejected retry.
        assert_eq!(ctrl.snapshot().messages().len(), 2);
    }

    #[tokio::test]
    async fn retry_while_busy_rejected() {
        let (_, ctrl, retry) = session(vec![MockReply::delayed(
            Duration::from_millis(200),
            MockReply::streamed(&[], "slow"),
        )]);

        let mut rx = ctrl.subscribe();
        let user_id = ctrl.send("question").await.unwrap();
        let result = retry.retry_from(&user_id).await;
        assert!(matches!(result, Err(SessionError::Busy)));
        wait_for_idle(&mut rx).await;
    }
}
