use super::client::LLMClient;
use super::error::CallError;
use super::types::{LLMRequest, LLMResponse};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Scripted LLM transport for tests
///
/// Responses are queued per model. When a model's queue is empty the
/// model's default response is used; without a default the call fails.
pub struct MockLLMClient {
    queues: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    defaults: Mutex<HashMap<String, MockResponse>>,
    events: Mutex<Vec<MockEvent>>,
    prompts: Mutex<Vec<(String, String)>>,
    name: String,
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub content: String,
    pub error: Option<CallError>,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: None,
            delay: None,
        }
    }

    pub fn error(error: CallError) -> Self {
        Self {
            content: String::new(),
            error: Some(error),
            delay: None,
        }
    }

    /// Delays the response, simulating a slow call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEventKind {
    Started,
    Finished,
}

/// One observed call boundary, for ordering assertions
#[derive(Debug, Clone)]
pub struct MockEvent {
    pub model: String,
    pub kind: MockEventKind,
    pub at: Instant,
}

impl MockLLMClient {
    pub fn new() -> Self {
        Self::with_name("MockLLM")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            name: name.into(),
        }
    }

    pub fn add_response(&self, model: &str, response: MockResponse) {
        self.queues
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn add_responses(&self, model: &str, responses: impl IntoIterator<Item = MockResponse>) {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(model.to_string()).or_default();
        for response in responses {
            queue.push_back(response);
        }
    }

    /// Response used whenever the model's queue is empty
    pub fn set_default(&self, model: &str, response: MockResponse) {
        self.defaults
            .lock()
            .unwrap()
            .insert(model.to_string(), response);
    }

    pub fn remaining_responses(&self, model: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(model)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Number of calls issued for `model`
    pub fn calls(&self, model: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.model == model && e.kind == MockEventKind::Started)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == MockEventKind::Started)
            .count()
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Prompts sent to `model`, oldest first
    pub fn prompts(&self, model: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == model)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    fn record(&self, model: &str, kind: MockEventKind) {
        self.events.lock().unwrap().push(MockEvent {
            model: model.to_string(),
            kind,
            at: Instant::now(),
        });
    }

    fn next_response(&self, model: &str) -> Option<MockResponse> {
        let queued = self
            .queues
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(VecDeque::pop_front);
        queued.or_else(|| self.defaults.lock().unwrap().get(model).cloned())
    }
}

impl Default for MockLLMClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, CallError> {
        self.record(&request.model, MockEventKind::Started);
        self.prompts
            .lock()
            .unwrap()
            .push((request.model.clone(), request.prompt_text().to_string()));
        let start = Instant::now();

        let response = self.next_response(&request.model);
        if let Some(delay) = response.as_ref().and_then(|r| r.delay) {
            tokio::time::sleep(delay).await;
        }
        self.record(&request.model, MockEventKind::Finished);

        let response = response.ok_or_else(|| {
            CallError::fatal(format!(
                "MockLLMClient: no response scripted for model {}",
                request.model
            ))
        })?;

        if let Some(error) = response.error {
            return Err(error);
        }

        Ok(LLMResponse::text(response.content, start.elapsed()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MockLLMClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLLMClient")
            .field("name", &self.name)
            .field("total_calls", &self.total_calls())
            .finish()
    }
}
