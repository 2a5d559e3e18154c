use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;
use turnstile_model::ToolCallRequest;

use super::{TurnInput, TurnReport};
use crate::controller::{Entry, TurnOutcome};
use crate::conversation::Conversation;
use crate::error::{ConversationError, TurnError};

/// One conversation and how its last turn stopped.
pub(super) struct Session {
    conversation: Conversation,
    /// `None` if the last turn failed, or no turn has stopped yet.
    last_outcome: Option<TurnOutcome>,
}

pub(super) enum Prepared {
    /// Nothing to run, the turn is already stopped.
    Stopped(TurnOutcome),
    Run(Entry),
}

impl Session {
    fn new(id: &str) -> Self {
        Self {
            conversation: Conversation::new(id),
            last_outcome: None,
        }
    }

    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    #[inline]
    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    /// Applies the input to the conversation, and decides where the turn
    /// starts. The conversation is left untouched on error.
    pub fn prepare(&mut self, input: TurnInput) -> Result<Prepared, TurnError> {
        match input {
            TurnInput::Human(message) => {
                let ids: Vec<_> = self
                    .conversation
                    .unanswered_tool_calls()
                    .into_iter()
                    .map(|req| req.id.clone())
                    .collect();
                if !ids.is_empty() {
                    let err = ConversationError::PendingToolCalls { ids };
                    return Err(err.into());
                }
                self.conversation.push_human(message);
                self.last_outcome = None;
                Ok(Prepared::Run(Entry::Invoke))
            }
            TurnInput::ToolResults(results) => {
                // A finished turn has nothing to answer, so only an empty
                // batch gets past this.
                self.conversation.append_tool_results(results)?;
                let unanswered: Vec<ToolCallRequest> = self
                    .conversation
                    .unanswered_tool_calls()
                    .into_iter()
                    .cloned()
                    .collect();

                match self.last_outcome.take() {
                    Some(outcome @ TurnOutcome::Done { .. }) => {
                        self.last_outcome = Some(outcome.clone());
                        Ok(Prepared::Stopped(outcome))
                    }
                    Some(TurnOutcome::AwaitExternal { .. })
                        if !unanswered.is_empty() =>
                    {
                        let outcome = TurnOutcome::AwaitExternal {
                            pending: unanswered,
                        };
                        self.last_outcome = Some(outcome.clone());
                        Ok(Prepared::Stopped(outcome))
                    }
                    Some(TurnOutcome::AwaitExternal { .. }) => {
                        Ok(Prepared::Run(Entry::Invoke))
                    }
                    None if unanswered.is_empty() => {
                        Ok(Prepared::Run(Entry::Invoke))
                    }
                    // The last turn was interrupted while running tools.
                    None => Ok(Prepared::Run(Entry::Route(unanswered))),
                }
            }
        }
    }

    /// Records how the turn stopped.
    pub fn finish(
        &mut self,
        result: Result<TurnOutcome, TurnError>,
    ) -> Result<TurnReport, TurnError> {
        let outcome = result?;
        self.last_outcome = Some(outcome.clone());
        Ok(self.report(outcome))
    }

    #[inline]
    pub fn report(&self, outcome: TurnOutcome) -> TurnReport {
        TurnReport {
            conversation: self.conversation.clone(),
            outcome,
        }
    }
}

type SessionMap = HashMap<String, Arc<AsyncMutex<Session>>>;

/// Sessions keyed by conversation id.
///
/// Each session is guarded by its own async mutex, which a turn holds until
/// it stops.
#[derive(Default)]
pub(super) struct SessionStore {
    sessions: Mutex<SessionMap>,
}

impl SessionStore {
    pub fn get(&self, id: &str) -> Option<Arc<AsyncMutex<Session>>> {
        self.lock().get(id).cloned()
    }

    pub fn get_or_create(&self, id: &str) -> Arc<AsyncMutex<Session>> {
        let mut sessions = self.lock();
        if let Some(session) = sessions.get(id) {
            return Arc::clone(session);
        }
        debug!("creating conversation: {id}");
        let session = Arc::new(AsyncMutex::new(Session::new(id)));
        sessions.insert(id.to_owned(), Arc::clone(&session));
        session
    }

    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, SessionMap> {
        // Critical sections never panic, so a poisoned map is still
        // consistent.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
