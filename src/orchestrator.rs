//! One chat exchange: record the prompt, stream the reply, record the answer.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::domain::config::FailurePolicy;
use crate::domain::errors::{RelayError, RelayResult};
use crate::domain::ids::SessionId;
use crate::domain::turn::Turn;
use crate::llm::{CompletionBackend, ReplyStream};
use crate::render::ResponseNormalizer;
use crate::session::ConversationStore;

/// Result of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// The assistant turn as recorded.
    pub reply: Turn,
    /// Number of fragments received from the backend.
    pub fragments: usize,
    /// Transcript length after the exchange.
    pub transcript_len: usize,
}

/// Runs chat exchanges against a store and a completion backend.
pub struct TurnOrchestrator {
    store: Arc<ConversationStore>,
    backend: Arc<dyn CompletionBackend>,
    normalizer: ResponseNormalizer,
    failure_policy: FailurePolicy,
}

impl TurnOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<ConversationStore>,
        backend: Arc<dyn CompletionBackend>,
        normalizer: ResponseNormalizer,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            backend,
            normalizer,
            failure_policy,
        }
    }

    /// Store backing this orchestrator.
    #[must_use]
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Run one exchange for `session`.
    ///
    /// Exchanges on the same session are serialized. With
    /// [`FailurePolicy::KeepUserTurn`] the prompt stays recorded when the
    /// backend fails; with [`FailurePolicy::Rollback`] nothing is recorded.
    ///
    /// # Errors
    /// Returns `InvalidPrompt` for a blank prompt, or the backend error that
    /// aborted the exchange.
    pub async fn run_turn(&self, session: &SessionId, prompt: &str) -> RelayResult<TurnOutcome> {
        if prompt.trim().is_empty() {
            return Err(RelayError::InvalidPrompt("prompt is empty".to_string()));
        }

        let _guard = self.store.lock_session(session).await;
        let user_turn = Turn::user(prompt);

        let mut transcript = match self.failure_policy {
            FailurePolicy::KeepUserTurn => {
                self.store.append_turn(session, user_turn.clone());
                self.store.get(session)
            }
            FailurePolicy::Rollback => {
                let mut pending = self.store.get(session);
                pending.push(user_turn.clone());
                pending
            }
        };
        debug!(session = %session, turns = transcript.len(), "Dispatching transcript");

        let (raw, fragments) = match accumulate(self.backend.send(&transcript)).await {
            Ok(accumulated) => accumulated,
            Err(err) => {
                warn!(session = %session, error = %err, policy = ?self.failure_policy, "Backend exchange failed");
                return Err(err);
            }
        };

        let reply = Turn::assistant(self.normalizer.normalize(&raw));
        match self.failure_policy {
            FailurePolicy::KeepUserTurn => self.store.append_turn(session, reply.clone()),
            FailurePolicy::Rollback => {
                self.store.append_turns(session, [user_turn, reply.clone()]);
            }
        }
        transcript.push(reply.clone());

        info!(
            session = %session,
            fragments,
            raw_chars = raw.len(),
            "Recorded assistant turn"
        );

        Ok(TurnOutcome {
            reply,
            fragments,
            transcript_len: transcript.len(),
        })
    }
}

/// Concatenate fragments in delivery order until the stream ends.
///
/// Returns the full text and the number of fragments.
///
/// # Errors
/// Returns the first error carried by the stream.
pub async fn accumulate(mut stream: ReplyStream) -> RelayResult<(String, usize)> {
    let mut text = String::new();
    let mut fragments = 0_usize;
    while let Some(reply) = stream.next().await {
        let reply = reply?;
        text.push_str(&reply.content);
        fragments += 1;
        if reply.done {
            break;
        }
    }
    Ok((text, fragments))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::domain::turn::Role;
    use crate::llm::PartialReply;

    /// Backend replaying a fixed script and recording what it was sent.
    struct ScriptedBackend {
        script: Vec<RelayResult<PartialReply>>,
        seen: Mutex<Vec<Vec<Turn>>>,
        delay: Duration,
    }

    impl ScriptedBackend {
        fn new(fragments: &[&str]) -> Self {
            let last = fragments.len().saturating_sub(1);
            let script = fragments
                .iter()
                .enumerate()
                .map(|(i, f)| {
                    Ok(PartialReply {
                        content: (*f).to_string(),
                        done: i == last,
                    })
                })
                .collect();
            Self {
                script,
                seen: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn failing(err: RelayError) -> Self {
            Self {
                script: vec![Err(err)],
                seen: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }
    }

    fn clone_item(item: &RelayResult<PartialReply>) -> RelayResult<PartialReply> {
        match item {
            Ok(reply) => Ok(reply.clone()),
            Err(RelayError::BackendProtocol(message)) => {
                Err(RelayError::BackendProtocol(message.clone()))
            }
            Err(err) => Err(RelayError::BackendUnavailable(err.to_string())),
        }
    }

    impl CompletionBackend for ScriptedBackend {
        fn send(&self, transcript: &[Turn]) -> ReplyStream {
            self.seen.lock().unwrap().push(transcript.to_vec());
            let items: Vec<_> = self.script.iter().map(clone_item).collect();
            let delay = self.delay;
            Box::pin(futures::stream::iter(items).then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            }))
        }
    }

    fn orchestrator(backend: Arc<ScriptedBackend>, policy: FailurePolicy) -> TurnOrchestrator {
        TurnOrchestrator::new(
            Arc::new(ConversationStore::new()),
            backend,
            ResponseNormalizer::default(),
            policy,
        )
    }

    #[tokio::test]
    async fn test_accumulates_fragments_in_order() {
        let stream: ReplyStream = Box::pin(futures::stream::iter(vec![
            Ok(PartialReply { content: "Hel".to_string(), done: false }),
            Ok(PartialReply { content: "lo".to_string(), done: false }),
            Ok(PartialReply { content: String::new(), done: true }),
            Ok(PartialReply { content: "after done".to_string(), done: false }),
        ]));
        let (text, fragments) = accumulate(stream).await.unwrap();
        assert_eq!(text, "Hello");
        assert_eq!(fragments, 3);
    }

    #[tokio::test]
    async fn test_full_exchange_records_both_turns() {
        let backend = Arc::new(ScriptedBackend::new(&["<think>", "**Hi** ", "there"]));
        let orch = orchestrator(Arc::clone(&backend), FailurePolicy::KeepUserTurn);
        let id = SessionId::generate();

        let outcome = orch.run_turn(&id, "hello").await.unwrap();
        assert_eq!(outcome.fragments, 3);
        assert_eq!(outcome.transcript_len, 2);
        assert!(outcome.reply.content.contains("<strong>Hi</strong>"));
        assert!(!outcome.reply.content.contains("<think>"));

        let transcript = orch.store().get(&id);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0], Turn::user("hello"));
        assert_eq!(transcript[1].role, Role::Assistant);

        // The backend saw the transcript including the new prompt.
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), [vec![Turn::user("hello")]]);
    }

    #[tokio::test]
    async fn test_second_turn_sends_history() {
        let backend = Arc::new(ScriptedBackend::new(&["ok"]));
        let orch = orchestrator(Arc::clone(&backend), FailurePolicy::KeepUserTurn);
        let id = SessionId::generate();

        orch.run_turn(&id, "one").await.unwrap();
        orch.run_turn(&id, "two").await.unwrap();

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][2], Turn::user("two"));
        assert_eq!(orch.store().get(&id).len(), 4);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_user_turn() {
        let backend = Arc::new(ScriptedBackend::failing(RelayError::BackendUnavailable(
            "connection refused".to_string(),
        )));
        let orch = orchestrator(backend, FailurePolicy::KeepUserTurn);
        let id = SessionId::generate();

        let err = orch.run_turn(&id, "anyone there?").await.unwrap_err();
        assert!(matches!(err, RelayError::BackendUnavailable(_)));
        assert_eq!(orch.store().get(&id), vec![Turn::user("anyone there?")]);
    }

    #[tokio::test]
    async fn test_backend_failure_rolls_back() {
        let backend = Arc::new(ScriptedBackend::failing(RelayError::BackendProtocol(
            "garbage".to_string(),
        )));
        let orch = orchestrator(backend, FailurePolicy::Rollback);
        let id = SessionId::generate();

        assert!(orch.run_turn(&id, "anyone there?").await.is_err());
        assert!(orch.store().get(&id).is_empty());
    }

    #[tokio::test]
    async fn test_rollback_policy_commits_on_success() {
        let backend = Arc::new(ScriptedBackend::new(&["fine"]));
        let orch = orchestrator(Arc::clone(&backend), FailurePolicy::Rollback);
        let id = SessionId::generate();

        orch.run_turn(&id, "how are you").await.unwrap();
        let transcript = orch.store().get(&id);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0], Turn::user("how are you"));
        assert_eq!(backend.seen.lock().unwrap()[0], vec![Turn::user("how are you")]);
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected_without_state_change() {
        let backend = Arc::new(ScriptedBackend::new(&["unused"]));
        let orch = orchestrator(Arc::clone(&backend), FailurePolicy::KeepUserTurn);
        let id = SessionId::generate();

        let err = orch.run_turn(&id, "  \n").await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidPrompt(_)));
        assert!(orch.store().is_empty());
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_exchanges_do_not_interleave() {
        let mut backend = ScriptedBackend::new(&["a", "b"]);
        backend.delay = Duration::from_millis(10);
        let orch = Arc::new(orchestrator(Arc::new(backend), FailurePolicy::KeepUserTurn));
        let id = SessionId::generate();

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let orch = Arc::clone(&orch);
                let id = id.clone();
                tokio::spawn(async move { orch.run_turn(&id, &format!("prompt {n}")).await })
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.await, Ok(Ok(_))));
        }

        let roles: Vec<Role> = orch.store().get(&id).iter().map(|t| t.role).collect();
        assert_eq!(roles.len(), 8);
        for pair in roles.chunks(2) {
            assert_eq!(pair, [Role::User, Role::Assistant]);
        }
    }
}
