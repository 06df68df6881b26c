//! LLM client abstraction layer
//!
//! [`LLMClient`] is the transport seam: [`HttpChatClient`] talks to the real
//! inference service and [`MockLLMClient`] scripts responses for tests.
//! [`InferenceClient`] adds rate limiting, timeouts and retries on top.

mod client;
mod error;
mod http;
mod inference;
mod mock;
mod retry;
mod types;

pub use client::LLMClient;
pub use error::CallError;
pub use http::HttpChatClient;
pub use inference::{CallSuccess, InferenceClient};
pub use mock::{MockEvent, MockEventKind, MockLLMClient, MockResponse};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use types::{ChatMessage, LLMRequest, LLMResponse, MessageRole};
