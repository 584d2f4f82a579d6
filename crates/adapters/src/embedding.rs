use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use storyforge_core::{
    ensure_embeddable, Config, EmbeddingConfig, EmbeddingModel, EmbeddingModelError,
};

use crate::base_url::{join_endpoint, resolve_base_url};
use crate::error::AdapterError;
use crate::llm::ensure_success;
use crate::retry::{call_with_retry, RetryConfig};

const JINA_ENDPOINT: &str = "https://api.jina.ai/v1/embeddings";
const JINA_DEFAULT_MODEL: &str = "jina-embeddings-v3";
/// Jina rejects inputs above its context window; longer texts are cut.
const JINA_MAX_CHARS: usize = 8000;
const OLLAMA_DEFAULT_BASE: &str = "http://localhost:11434";

pub fn create_embedding_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn EmbeddingModel>, AdapterError> {
    let profile = config.get_embedding_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown embedding profile `{profile_name}`"))
    })?;
    create_embedding_adapter_from_profile(profile)
}

pub fn create_embedding_adapter_from_profile(
    profile: &EmbeddingConfig,
) -> Result<Box<dyn EmbeddingModel>, AdapterError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(profile.timeout.max(1)))
        .build()?;
    let format = profile.interface_format.trim().to_lowercase();

    match format.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbeddingAdapter::new(
            client,
            &profile.api_key,
            &resolve_base_url(&profile.base_url, "https://api.openai.com/v1"),
            &profile.model_name,
        )?)),
        "siliconflow" | "硅基流动" => Ok(Box::new(OpenAiEmbeddingAdapter::new(
            client,
            &profile.api_key,
            &resolve_base_url(&profile.base_url, "https://api.siliconflow.cn/v1"),
            &profile.model_name,
        )?)),
        "jina" => Ok(Box::new(JinaEmbeddingAdapter::new(
            client,
            &profile.api_key,
            &profile.model_name,
        )?)),
        "ollama" => Ok(Box::new(OllamaEmbeddingAdapter::new(
            client,
            &profile.base_url,
            &profile.model_name,
        )?)),
        other => Err(AdapterError::InvalidConfig(format!(
            "unknown embedding interface_format: {other}"
        ))),
    }
}

fn require_model_name(model_name: &str) -> Result<String, AdapterError> {
    let trimmed = model_name.trim();
    if trimmed.is_empty() {
        return Err(AdapterError::InvalidConfig(
            "embedding model_name must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn check_vector_count(
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, AdapterError> {
    if vectors.len() != expected {
        return Err(AdapterError::VectorCount {
            expected,
            actual: vectors.len(),
        });
    }
    Ok(vectors)
}

fn single_query(mut vectors: Vec<Vec<f32>>) -> Result<Vec<f32>, EmbeddingModelError> {
    vectors
        .pop()
        .ok_or_else(|| EmbeddingModelError::from(AdapterError::EmptyResponse))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Vectors in input order; providers may return `data` entries shuffled.
fn into_ordered_vectors(response: EmbeddingResponse) -> Vec<Vec<f32>> {
    let mut data = response.data;
    if data.iter().all(|datum| datum.index.is_some()) {
        data.sort_by_key(|datum| datum.index);
    }
    data.into_iter().map(|datum| datum.embedding).collect()
}

struct OpenAiEmbeddingAdapter {
    client: Client,
    url: String,
    api_key: Option<String>,
    model_name: String,
    retry: RetryConfig,
}

impl OpenAiEmbeddingAdapter {
    fn new(
        client: Client,
        api_key: &str,
        base_url: &str,
        model_name: &str,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client,
            url: join_endpoint(base_url, "embeddings"),
            api_key: Some(api_key.trim().to_string()).filter(|key| !key.is_empty()),
            model_name: require_model_name(model_name)?,
            retry: RetryConfig::default(),
        })
    }

    fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AdapterError> {
        let body = EmbeddingRequest {
            model: &self.model_name,
            input: texts,
            task: None,
        };
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: EmbeddingResponse = ensure_success(request.send()?)?.json()?;
        check_vector_count(texts.len(), into_ordered_vectors(response))
    }
}

impl EmbeddingModel for OpenAiEmbeddingAdapter {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingModelError> {
        ensure_embeddable(texts).map_err(AdapterError::from)?;
        debug!("embedding {} documents via {}", texts.len(), self.url);
        Ok(call_with_retry("embeddings", &self.retry, || self.request(texts))?)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingModelError> {
        let input = [text.to_string()];
        ensure_embeddable(&input).map_err(AdapterError::from)?;
        let vectors = call_with_retry("embeddings", &self.retry, || self.request(&input))?;
        single_query(vectors)
    }

    fn model_name(&self) -> Option<&str> {
        Some(&self.model_name)
    }
}

struct JinaEmbeddingAdapter {
    client: Client,
    api_key: String,
    model_name: String,
    retry: RetryConfig,
}

impl JinaEmbeddingAdapter {
    fn new(client: Client, api_key: &str, model_name: &str) -> Result<Self, AdapterError> {
        if api_key.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "Jina api_key must not be empty".to_string(),
            ));
        }
        let model_name = if model_name.trim().is_empty() {
            JINA_DEFAULT_MODEL.to_string()
        } else {
            model_name.trim().to_string()
        };
        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            model_name,
            retry: RetryConfig::default(),
        })
    }

    fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AdapterError> {
        let input: Vec<String> = texts.iter().map(|text| truncate_for_jina(text)).collect();
        let body = EmbeddingRequest {
            model: &self.model_name,
            input: &input,
            task: Some("text-matching"),
        };
        let response = self
            .client
            .post(JINA_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;
        let response: EmbeddingResponse = ensure_success(response)?.json()?;
        check_vector_count(texts.len(), into_ordered_vectors(response))
    }
}

fn truncate_for_jina(text: &str) -> String {
    match text.char_indices().nth(JINA_MAX_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

impl EmbeddingModel for JinaEmbeddingAdapter {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingModelError> {
        ensure_embeddable(texts).map_err(AdapterError::from)?;
        Ok(call_with_retry("jina", &self.retry, || self.request(texts))?)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingModelError> {
        let input = [text.to_string()];
        ensure_embeddable(&input).map_err(AdapterError::from)?;
        let vectors = call_with_retry("jina", &self.retry, || self.request(&input))?;
        single_query(vectors)
    }

    fn model_name(&self) -> Option<&str> {
        Some(&self.model_name)
    }
}

struct OllamaEmbeddingAdapter {
    client: Client,
    url: String,
    model_name: String,
    retry: RetryConfig,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl OllamaEmbeddingAdapter {
    fn new(client: Client, base_url: &str, model_name: &str) -> Result<Self, AdapterError> {
        Ok(Self {
            client,
            url: join_endpoint(&normalize_ollama_url(base_url), "api/embeddings"),
            model_name: require_model_name(model_name)?,
            retry: RetryConfig::default(),
        })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, AdapterError> {
        let body = OllamaRequest {
            model: &self.model_name,
            prompt: text,
        };
        let response = self.client.post(&self.url).json(&body).send()?;
        let parsed: OllamaResponse = ensure_success(response)?.json()?;
        if parsed.embedding.is_empty() {
            return Err(AdapterError::EmptyResponse);
        }
        Ok(parsed.embedding)
    }
}

/// Ollama's native API lives at the server root, not under `/v1` or `/api`.
fn normalize_ollama_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return OLLAMA_DEFAULT_BASE.to_string();
    }
    let stripped = trimmed
        .strip_suffix("/api/embeddings")
        .or_else(|| trimmed.strip_suffix("/api"))
        .or_else(|| trimmed.strip_suffix("/v1"))
        .unwrap_or(trimmed);
    stripped.to_string()
}

impl EmbeddingModel for OllamaEmbeddingAdapter {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingModelError> {
        ensure_embeddable(texts).map_err(AdapterError::from)?;
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(call_with_retry("ollama", &self.retry, || self.embed_one(text))?);
        }
        Ok(vectors)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingModelError> {
        ensure_embeddable(&[text]).map_err(AdapterError::from)?;
        Ok(call_with_retry("ollama", &self.retry, || self.embed_one(text))?)
    }

    fn model_name(&self) -> Option<&str> {
        Some(&self.model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(format: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            api_key: "key".into(),
            interface_format: format.into(),
            model_name: "text-embedding-3-small".into(),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn supported_formats_build_adapters() {
        for format in ["OpenAI", "SiliconFlow", "Jina", "Ollama"] {
            let adapter = create_embedding_adapter_from_profile(&profile(format)).unwrap();
            assert!(adapter.model_name().is_some(), "{format}");
        }
        assert!(matches!(
            create_embedding_adapter_from_profile(&profile("Gemini")),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn jina_defaults_its_model_name() {
        let adapter = JinaEmbeddingAdapter::new(Client::new(), "key", " ").unwrap();
        assert_eq!(EmbeddingModel::model_name(&adapter), Some(JINA_DEFAULT_MODEL));
        assert!(JinaEmbeddingAdapter::new(Client::new(), "", "m").is_err());
    }

    #[test]
    fn blank_inputs_are_rejected_before_any_request() {
        let adapter = OpenAiEmbeddingAdapter::new(
            Client::new(),
            "",
            "http://127.0.0.1:9/v1",
            "model",
        )
        .unwrap();
        assert!(adapter.embed_documents(&[]).is_err());
        assert!(adapter
            .embed_documents(&["正文".to_string(), "  ".to_string()])
            .is_err());
        assert!(adapter.embed_query("").is_err());
    }

    #[test]
    fn ollama_url_is_reduced_to_server_root() {
        assert_eq!(normalize_ollama_url(""), OLLAMA_DEFAULT_BASE);
        assert_eq!(
            normalize_ollama_url("http://gpu-box:11434/v1/"),
            "http://gpu-box:11434"
        );
        assert_eq!(
            normalize_ollama_url("http://gpu-box:11434/api/embeddings"),
            "http://gpu-box:11434"
        );
    }

    #[test]
    fn jina_inputs_are_truncated_by_characters() {
        let long = "章".repeat(JINA_MAX_CHARS + 10);
        assert_eq!(truncate_for_jina(&long).chars().count(), JINA_MAX_CHARS);
        assert_eq!(truncate_for_jina("短文"), "短文");
    }

    #[test]
    fn response_vectors_follow_input_order() {
        let parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#,
        )
        .unwrap();
        assert_eq!(into_ordered_vectors(parsed), vec![vec![1.0], vec![2.0]]);
        assert!(matches!(
            check_vector_count(2, vec![vec![1.0]]),
            Err(AdapterError::VectorCount {
                expected: 2,
                actual: 1
            })
        ));
    }
}
