//! LLM provider adapters.
//!
//! The runtime only ever talks to [`LlmProvider`]; adapters translate
//! between the internal chat types and each provider's wire format. The
//! OpenAI-compatible adapter covers OpenAI, Azure-less proxies, Ollama,
//! vLLM and friends; the mock provider drives tests without a network.

pub mod mock;
pub mod openai;
pub mod registry;
pub(crate) mod sse;
pub mod traits;

pub use mock::MockProvider;
pub use openai::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};

/// Map a reqwest error into the domain error, preserving the timeout
/// distinction the runtime cares about.
pub(crate) fn from_reqwest(e: reqwest::Error) -> sg_domain::error::Error {
    if e.is_timeout() {
        sg_domain::error::Error::Timeout(e.to_string())
    } else {
        sg_domain::error::Error::Http(e.to_string())
    }
}
