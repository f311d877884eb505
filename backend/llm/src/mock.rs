use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use callforge_core::{GenerationError, LanguageModel};

/// A language model that replays canned responses, for tests and dry runs.
///
/// Rules match on a prompt substring and win over the queue. Queued responses are
/// consumed in order; once the queue is empty the default response repeats.
pub struct ScriptedModel {
    rules: Vec<(String, String)>,
    queue: Mutex<VecDeque<String>>,
    default_response: String,
    failure: Option<GenerationError>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            default_response: "Okay.".to_string(),
            failure: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responses<I, S>(self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut queue) = self.queue.lock() {
            queue.extend(responses.into_iter().map(Into::into));
        }
        self
    }

    pub fn with_rule(mut self, prompt_contains: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((prompt_contains.into(), response.into()));
        self
    }

    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Every call fails with `err`.
    pub fn failing(mut self, err: GenerationError) -> Self {
        self.failure = Some(err);
        self
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if let Some((_, response)) = self.rules.iter().find(|(key, _)| prompt.contains(key.as_str())) {
            return Ok(response.clone());
        }
        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        Ok(next.unwrap_or_else(|| self.default_response.clone()))
    }
}
