//! Prompt construction for spoken turns, summaries and answer extraction.

use serde_json::Value;

use callforge_core::{format_transcript, Agent, ConversationTurn, Question};

/// Spoken after the final exchange.
pub const CLOSING_REMARK: &str = "Thank you for the update. Drive safely. Goodbye.";

/// Spoken when the language model cannot produce a turn.
pub const FALLBACK_REPLY: &str =
    "Sorry, we are facing a technical issue right now. We will call you back shortly. Goodbye.";

const DEFAULT_PERSONA: &str = "You are a fleet operations assistant making an automated check-in call. \
Be brief, polite and objective. Ask one question at a time and do not repeat a question \
that has already been answered.";

/// Questions asked when no agent persona is attached to the call.
pub fn default_questions() -> Vec<Question> {
    [
        ("location", "Where is the vehicle right now?"),
        ("haltage_reason", "Why has the vehicle stopped?"),
        ("eta", "When do you expect to start moving again?"),
    ]
    .into_iter()
    .map(|(id, text)| Question {
        id: id.to_string(),
        text: text.to_string(),
    })
    .collect()
}

pub fn system_prompt(agent: Option<&Agent>, driver_name: &str) -> String {
    match agent {
        Some(agent) => {
            let mut prompt = format!(
                "{}\n\nYou are calling {driver_name}.",
                agent.system_prompt.trim()
            );
            if !agent.questions.is_empty() {
                prompt.push_str(" Ask these questions one by one:");
                for q in &agent.questions {
                    prompt.push_str("\n- ");
                    prompt.push_str(&q.text);
                }
            }
            prompt
        }
        None => format!(
            "{DEFAULT_PERSONA}\n\nYou are calling {driver_name}. Conduct a brief status update call in Hindi. \
Ask about: current location, reason for haltage, and estimated time to resume."
        ),
    }
}

/// Opening line for hosted voice agents when the persona has none.
pub fn default_first_message(driver_name: &str) -> String {
    format!("Namaste {driver_name} ji, this is a quick status check from fleet operations. Do you have a minute?")
}

/// Prompt for the agent's next utterance given the conversation so far.
pub fn conversation_prompt(system: &str, turns: &[ConversationTurn]) -> String {
    format!(
        "{system}\n\nConversation so far:\n{}\n\nAgent:",
        format_transcript(turns)
    )
}

pub fn summary_prompt(transcript: &str) -> String {
    format!("Summarize this phone conversation in 2-3 sentences in Hindi:\n\n{transcript}\n\nSummary:")
}

pub fn answers_prompt(questions: &[Question], transcript: &str) -> String {
    let listed = questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {} ({})", i + 1, q.text, q.id))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Extract the user's answers to these questions from the conversation:\n\n{listed}\n\n\
Conversation:\n{transcript}\n\nExtract answers in JSON format, keyed by question id:"
    )
}

/// Models tend to echo the speaker label; drop it.
pub fn clean_reply(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("Agent:")
        .map(str::trim_start)
        .unwrap_or(trimmed)
        .to_string()
}

/// Pull the first JSON object out of a model response.
///
/// Falls back to the raw text as a JSON string so nothing the model said is lost.
pub fn parse_answers(raw: &str) -> Value {
    let object = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str::<Value>(&raw[start..=end]).ok()
        }
        _ => None,
    };
    object
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::String(raw.trim().to_string()))
}
