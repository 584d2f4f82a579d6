//! Blocking HTTP implementations of the core `LanguageModel` and
//! `EmbeddingModel` traits.

mod base_url;
mod embedding;
mod error;
mod llm;
mod retry;

pub use base_url::{check_base_url, join_endpoint, resolve_base_url};
pub use embedding::{create_embedding_adapter, create_embedding_adapter_from_profile};
pub use error::AdapterError;
pub use llm::{create_llm_adapter, create_llm_adapter_from_profile, LlmProvider};
pub use retry::{call_with_retry, RetryConfig};
