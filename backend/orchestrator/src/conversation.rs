//! Turn-taking for self-hosted calls.
//!
//! The phase of a conversation is never stored. It is derived from the call
//! status and the turn log on every webhook, and every append is a
//! compare-and-append against the length that was read. A writer that loses
//! the race reloads and re-derives, so duplicate or concurrent deliveries of
//! the same provider event converge on one turn log.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use callforge_core::{
    CallError, CallRecord, CallSessionStore, CallStatus, ConversationTurn, LanguageModel, Question,
    TurnRole,
};
use callforge_logging::{CallEvent, CallEventLogger};

use crate::prompt::{
    answers_prompt, clean_reply, conversation_prompt, parse_answers, summary_prompt, CLOSING_REMARK,
    FALLBACK_REPLY,
};

/// Default number of agent turns before the call is wrapped up.
pub const DEFAULT_EXCHANGE_CAP: usize = 5;

/// Reload-and-retry budget when another writer keeps winning the append.
const MAX_APPEND_ATTEMPTS: usize = 4;

/// How soon after an answer an unidentified repeat of the same utterance is
/// still taken as a provider redelivery rather than a new answer.
pub const DEFAULT_REDELIVERY_WINDOW_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    /// Connected or ringing, nothing said yet.
    Ringing,
    /// The agent spoke last and is waiting for the callee.
    Listening,
    /// The callee spoke last and has not been answered.
    Speaking,
    /// The closing turn has been said.
    Closing,
    Ended,
    Failed,
}

pub fn phase(status: CallStatus, turns: &[ConversationTurn]) -> ConversationPhase {
    match status {
        CallStatus::Completed => ConversationPhase::Ended,
        s if s.is_terminal() => ConversationPhase::Failed,
        _ if turns.iter().any(|t| t.closing) => ConversationPhase::Closing,
        _ => match turns.last() {
            None => ConversationPhase::Ringing,
            Some(t) if t.role == TurnRole::Agent => ConversationPhase::Listening,
            Some(_) => ConversationPhase::Speaking,
        },
    }
}

/// What to say next, before provider-specific rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpokenTurn {
    pub text: String,
    pub continue_listening: bool,
}

impl From<&ConversationTurn> for SpokenTurn {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            text: turn.text.clone(),
            continue_listening: !turn.closing,
        }
    }
}

/// Summary and extracted answers for a finished conversation.
#[derive(Debug, Clone, Default)]
pub struct Debrief {
    pub summary: Option<String>,
    pub answers: Option<Value>,
}

pub struct ConversationMachine {
    store: Arc<dyn CallSessionStore>,
    model: Arc<dyn LanguageModel>,
    exchange_cap: usize,
    redelivery_window: Duration,
}

impl ConversationMachine {
    pub fn new(
        store: Arc<dyn CallSessionStore>,
        model: Arc<dyn LanguageModel>,
        exchange_cap: usize,
    ) -> Self {
        Self {
            store,
            model,
            exchange_cap: exchange_cap.max(1),
            redelivery_window: Duration::seconds(DEFAULT_REDELIVERY_WINDOW_SECS),
        }
    }

    pub fn with_redelivery_window(mut self, window: Duration) -> Self {
        self.redelivery_window = window;
        self
    }

    /// Opening line on connect. A repeated connect event repeats what was said.
    pub async fn greet(
        &self,
        call: &CallRecord,
        system_prompt: &str,
        first_message: Option<&str>,
    ) -> Result<SpokenTurn, CallError> {
        for _ in 0..MAX_APPEND_ATTEMPTS {
            let turns = self.store.turns(call.id).await?;
            if let Some(said) = turns.iter().rev().find(|t| t.role == TurnRole::Agent) {
                debug!(call_id = %call.id, "Greeting already spoken, repeating last agent turn");
                return Ok(SpokenTurn::from(said));
            }

            let agent_turns_after = 1;
            let turn = match first_message.map(str::trim).filter(|m| !m.is_empty()) {
                Some(text) => ConversationTurn::agent(text),
                None => self.next_agent_turn(system_prompt, &turns, agent_turns_after).await,
            };
            if self.append(call.id, turns.len(), &turn).await? {
                return Ok(SpokenTurn::from(&turn));
            }
        }
        Err(contended(call.id))
    }

    /// Record what the callee said and produce the agent's answer.
    ///
    /// A redelivery of an utterance already in the log gets the same answer
    /// again without new turns. Redeliveries are recognised by `delivery_id`
    /// when the provider sends one; otherwise a repeat of the last answered
    /// utterance counts as a redelivery only inside the redelivery window.
    pub async fn on_speech(
        &self,
        call: &CallRecord,
        system_prompt: &str,
        speech: &str,
        delivery_id: Option<&str>,
    ) -> Result<SpokenTurn, CallError> {
        let speech = speech.trim();

        for _ in 0..MAX_APPEND_ATTEMPTS {
            let turns = self.store.turns(call.id).await?;

            match phase(call.status, &turns) {
                ConversationPhase::Closing | ConversationPhase::Ended | ConversationPhase::Failed => {
                    return Ok(last_words(&turns));
                }
                _ => {}
            }

            let heard_at = self.redelivered(&turns, speech, delivery_id);
            if let Some(at) = heard_at {
                if let Some(answered) = turns[at + 1..].iter().find(|t| t.role == TurnRole::Agent) {
                    debug!(call_id = %call.id, delivery_id = ?delivery_id, "Duplicate speech delivery");
                    return Ok(SpokenTurn::from(answered));
                }
            }

            let mut history = turns;
            if heard_at.is_none() {
                let heard = ConversationTurn::user(speech).with_delivery(delivery_id);
                if !self.append(call.id, history.len(), &heard).await? {
                    continue;
                }
                history.push(heard);
            }

            let agent_turns_after = history.iter().filter(|t| t.role == TurnRole::Agent).count() + 1;
            let reply = self
                .next_agent_turn(system_prompt, &history, agent_turns_after)
                .await;
            if self.append(call.id, history.len(), &reply).await? {
                return Ok(SpokenTurn::from(&reply));
            }
        }
        Err(contended(call.id))
    }

    /// Index of the user turn that `speech` is a redelivery of, if any.
    fn redelivered(
        &self,
        turns: &[ConversationTurn],
        speech: &str,
        delivery_id: Option<&str>,
    ) -> Option<usize> {
        if let Some(id) = delivery_id {
            let by_id = turns.iter().rposition(|t| {
                t.role == TurnRole::User && t.text == speech && t.delivery_id.as_deref() == Some(id)
            });
            if by_id.is_some() {
                return by_id;
            }
        }

        let at = turns.iter().rposition(|t| t.role == TurnRole::User)?;
        let heard = &turns[at];
        if heard.text != speech {
            return None;
        }
        if delivery_id.is_some() && heard.delivery_id.is_some() {
            return None;
        }
        match turns[at + 1..].iter().find(|t| t.role == TurnRole::Agent) {
            // Heard but not yet answered: a concurrent delivery of the same utterance.
            None => Some(at),
            Some(answered) if Utc::now() - answered.timestamp < self.redelivery_window => Some(at),
            Some(_) => None,
        }
    }

    /// Summarize a finished conversation and extract answers to `questions`.
    ///
    /// Model failures leave the corresponding field empty.
    pub async fn debrief(&self, transcript: &str, questions: &[Question]) -> Debrief {
        let summary = match self.model.generate(&summary_prompt(transcript)).await {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                warn!(model = self.model.name(), error = %e, "Summary generation failed");
                None
            }
        };

        let answers = if questions.is_empty() {
            None
        } else {
            match self.model.generate(&answers_prompt(questions, transcript)).await {
                Ok(raw) => Some(parse_answers(&raw)),
                Err(e) => {
                    warn!(model = self.model.name(), error = %e, "Answer extraction failed");
                    None
                }
            }
        };

        Debrief { summary, answers }
    }

    async fn next_agent_turn(
        &self,
        system_prompt: &str,
        history: &[ConversationTurn],
        agent_turns_after: usize,
    ) -> ConversationTurn {
        match self
            .model
            .generate(&conversation_prompt(system_prompt, history))
            .await
        {
            Ok(raw) => {
                let text = clean_reply(&raw);
                if agent_turns_after >= self.exchange_cap {
                    ConversationTurn::closing(format!("{text} {CLOSING_REMARK}"))
                } else {
                    ConversationTurn::agent(text)
                }
            }
            Err(e) => {
                warn!(model = self.model.name(), error = %e, "Turn generation failed, closing the call");
                ConversationTurn::closing(FALLBACK_REPLY)
            }
        }
    }

    async fn append(
        &self,
        call_id: Uuid,
        expected_len: usize,
        turn: &ConversationTurn,
    ) -> Result<bool, CallError> {
        let appended = self
            .store
            .append_turn(call_id, expected_len, turn.clone())
            .await?;
        if appended {
            CallEventLogger::log_event(
                &call_id.to_string(),
                CallEvent::TurnAppended {
                    role: turn.role.label().to_ascii_lowercase(),
                    text: turn.text.clone(),
                },
            );
        } else {
            debug!(call_id = %call_id, expected_len, "Lost turn append race, reloading");
        }
        Ok(appended)
    }
}

fn last_words(turns: &[ConversationTurn]) -> SpokenTurn {
    let text = turns
        .iter()
        .rev()
        .find(|t| t.role == TurnRole::Agent)
        .map(|t| t.text.clone())
        .unwrap_or_else(|| CLOSING_REMARK.to_string());
    SpokenTurn {
        text,
        continue_listening: false,
    }
}

fn contended(call_id: Uuid) -> CallError {
    CallError::Storage(format!("turn log of call {call_id} kept changing under concurrent writers"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use callforge_core::{GenerationError, NewCall, ProviderKind};
    use callforge_llm::ScriptedModel;
    use callforge_store::{MemoryStore, SqliteStore};

    async fn setup(model: ScriptedModel) -> (Arc<MemoryStore>, ConversationMachine, CallRecord) {
        let store = Arc::new(MemoryStore::new());
        let call = store
            .create_call(NewCall {
                provider: ProviderKind::Exotel,
                provider_call_id: "sid-1".into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap();
        let machine = ConversationMachine::new(store.clone(), Arc::new(model), DEFAULT_EXCHANGE_CAP);
        (store, machine, call)
    }

    #[test]
    fn phase_is_derived_from_turns() {
        let agent = ConversationTurn::agent("Namaste");
        let user = ConversationTurn::user("Haan");
        let closing = ConversationTurn::closing("Bye");

        assert_eq!(phase(CallStatus::Ringing, &[]), ConversationPhase::Ringing);
        assert_eq!(phase(CallStatus::InProgress, &[agent.clone()]), ConversationPhase::Listening);
        assert_eq!(
            phase(CallStatus::InProgress, &[agent.clone(), user.clone()]),
            ConversationPhase::Speaking
        );
        assert_eq!(
            phase(CallStatus::InProgress, &[agent, user, closing]),
            ConversationPhase::Closing
        );
        assert_eq!(phase(CallStatus::Completed, &[]), ConversationPhase::Ended);
        assert_eq!(phase(CallStatus::NoAnswer, &[]), ConversationPhase::Failed);
    }

    #[tokio::test]
    async fn repeated_greeting_does_not_add_turns() {
        let (store, machine, call) = setup(ScriptedModel::new().with_responses(["Namaste ji"])).await;

        let first = machine.greet(&call, "SYS", None).await.unwrap();
        let again = machine.greet(&call, "SYS", None).await.unwrap();

        assert_eq!(first.text, "Namaste ji");
        assert!(first.continue_listening);
        assert_eq!(again, first);
        assert_eq!(store.turns(call.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn configured_first_message_skips_the_model() {
        let model = ScriptedModel::new();
        let (_, machine, call) = setup(model).await;
        let turn = machine.greet(&call, "SYS", Some(" Hello Rajesh ")).await.unwrap();
        assert_eq!(turn.text, "Hello Rajesh");
    }

    #[tokio::test]
    async fn duplicate_speech_is_answered_once() {
        let model = ScriptedModel::new().with_responses(["Namaste", "Kab tak chalenge?", "unused"]);
        let (store, machine, call) = setup(model).await;

        machine.greet(&call, "SYS", None).await.unwrap();
        let reply = machine.on_speech(&call, "SYS", "Nagpur mein hoon", None).await.unwrap();
        let replay = machine.on_speech(&call, "SYS", "Nagpur mein hoon", None).await.unwrap();

        assert_eq!(reply.text, "Kab tak chalenge?");
        assert_eq!(replay, reply);
        let turns = store.turns(call.id).await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, TurnRole::User);
    }

    #[tokio::test]
    async fn closes_by_the_fifth_agent_turn() {
        let (store, machine, call) = setup(ScriptedModel::new().with_default("Achha.")).await;

        machine.greet(&call, "SYS", None).await.unwrap();
        let mut replies = Vec::new();
        for i in 0..10 {
            replies.push(machine.on_speech(&call, "SYS", &format!("answer {i}"), None).await.unwrap());
        }

        let turns = store.turns(call.id).await.unwrap();
        let agent_turns = turns.iter().filter(|t| t.role == TurnRole::Agent).count();
        assert_eq!(agent_turns, DEFAULT_EXCHANGE_CAP);
        assert!(replies[..3].iter().all(|r| r.continue_listening));
        assert!(!replies[3].continue_listening);
        assert!(replies[3].text.ends_with(CLOSING_REMARK));
        assert!(replies[4..].iter().all(|r| !r.continue_listening));
        assert_eq!(phase(call.status, &turns), ConversationPhase::Closing);
    }

    #[tokio::test]
    async fn model_failure_produces_polite_closing() {
        let model = ScriptedModel::new().failing(GenerationError::Unavailable("down".into()));
        let (store, machine, call) = setup(model).await;

        let turn = machine.greet(&call, "SYS", None).await.unwrap();
        assert_eq!(turn.text, FALLBACK_REPLY);
        assert!(!turn.continue_listening);
        assert!(store.turns(call.id).await.unwrap()[0].closing);
    }

    #[tokio::test]
    async fn debrief_extracts_summary_and_answers() {
        let model = ScriptedModel::new()
            .with_rule("Summarize", "Driver is in Nagpur.")
            .with_rule("Extract", r#"{"location": "Nagpur"}"#);
        let (_, machine, _) = setup(model).await;

        let debrief = machine
            .debrief("Agent: Kahan ho?\nUser: Nagpur", &crate::prompt::default_questions())
            .await;
        assert_eq!(debrief.summary.as_deref(), Some("Driver is in Nagpur."));
        assert_eq!(debrief.answers, Some(serde_json::json!({"location": "Nagpur"})));
    }

    #[tokio::test]
    async fn same_answer_to_different_questions_is_kept() {
        let model = ScriptedModel::new().with_responses([
            "Namaste, kya aap Nagpur mein hain?",
            "Kya gaadi load ho gayi?",
            "Kitne baje nikloge?",
            "Theek hai.",
        ]);
        let (store, machine, call) = setup(model).await;

        machine.greet(&call, "SYS", None).await.unwrap();
        machine.on_speech(&call, "SYS", "haan", Some("evt-1")).await.unwrap();
        let second = machine.on_speech(&call, "SYS", "haan", Some("evt-2")).await.unwrap();
        machine.on_speech(&call, "SYS", "shaam ko", Some("evt-3")).await.unwrap();

        assert_eq!(second.text, "Kitne baje nikloge?");
        let turns = store.turns(call.id).await.unwrap();
        assert_eq!(turns.len(), 7);
        assert_eq!(turns[3].text, "haan");
        assert_eq!(turns[3].delivery_id.as_deref(), Some("evt-2"));
    }

    #[tokio::test]
    async fn unidentified_repeat_after_the_window_is_a_new_answer() {
        let model = ScriptedModel::new().with_responses(["Namaste", "Load ho gaya?", "Nikal gaye?", "Theek hai."]);
        let store = Arc::new(MemoryStore::new());
        let call = store
            .create_call(NewCall {
                provider: ProviderKind::Exotel,
                provider_call_id: "sid-9".into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap();
        let machine = ConversationMachine::new(store.clone(), Arc::new(model), DEFAULT_EXCHANGE_CAP)
            .with_redelivery_window(Duration::zero());

        machine.greet(&call, "SYS", None).await.unwrap();
        for speech in ["haan", "haan", "abhi"] {
            machine.on_speech(&call, "SYS", speech, None).await.unwrap();
        }

        assert_eq!(store.turns(call.id).await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn redelivered_event_id_is_answered_once() {
        let model = ScriptedModel::new().with_responses(["Namaste", "Kab tak?", "unused"]);
        let (store, machine, call) = setup(model).await;

        machine.greet(&call, "SYS", None).await.unwrap();
        let reply = machine.on_speech(&call, "SYS", "haan", Some("evt-1")).await.unwrap();
        let replay = machine.on_speech(&call, "SYS", "haan", Some("evt-1")).await.unwrap();

        assert_eq!(replay, reply);
        assert_eq!(store.turns(call.id).await.unwrap().len(), 3);
    }

    async fn concurrent_delivery_appends_one_exchange(store: Arc<dyn CallSessionStore>) {
        let call = store
            .create_call(NewCall {
                provider: ProviderKind::Exotel,
                provider_call_id: "sid-c".into(),
                driver_id: "d1".into(),
                agent_id: None,
            })
            .await
            .unwrap();
        let model = ScriptedModel::new().with_default("Achha, kab tak pahunchoge?");
        let machine = ConversationMachine::new(store.clone(), Arc::new(model), DEFAULT_EXCHANGE_CAP);

        machine.greet(&call, "SYS", Some("Namaste")).await.unwrap();
        let (a, b) = tokio::join!(
            machine.on_speech(&call, "SYS", "Nagpur mein hoon", Some("evt-7")),
            machine.on_speech(&call, "SYS", "Nagpur mein hoon", Some("evt-7")),
        );
        assert_eq!(a.unwrap(), b.unwrap());

        let turns = store.turns(call.id).await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns.iter().filter(|t| t.role == TurnRole::User).count(), 1);
        assert_eq!(turns.iter().filter(|t| t.role == TurnRole::Agent).count(), 2);
    }

    #[tokio::test]
    async fn concurrent_delivery_on_memory_store() {
        concurrent_delivery_appends_one_exchange(Arc::new(MemoryStore::new())).await;
    }

    #[tokio::test]
    async fn concurrent_delivery_on_sqlite_store() {
        concurrent_delivery_appends_one_exchange(Arc::new(SqliteStore::in_memory().unwrap())).await;
    }
}
