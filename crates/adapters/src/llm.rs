use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{self, HeaderValue};
use serde::{Deserialize, Serialize};

use storyforge_core::{Config, LanguageModel, LanguageModelError, LlmConfig};

use crate::base_url::{join_endpoint, resolve_base_url};
use crate::error::AdapterError;
use crate::retry::{call_with_retry, RetryConfig};

const GEMINI_DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Provider families selected by a profile's `interface_format`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    DeepSeek,
    Ollama,
    SiliconFlow,
    Grok,
    AzureOpenAi,
    Gemini,
}

impl LlmProvider {
    pub fn parse(interface_format: &str) -> Option<Self> {
        let normalized = interface_format.trim().to_lowercase();
        let provider = match normalized.as_str() {
            "openai" => Self::OpenAi,
            "deepseek" => Self::DeepSeek,
            "ollama" => Self::Ollama,
            "siliconflow" | "硅基流动" => Self::SiliconFlow,
            "grok" => Self::Grok,
            "azure openai" | "azure_openai" | "azureopenai" => Self::AzureOpenAi,
            "gemini" => Self::Gemini,
            _ => return None,
        };
        Some(provider)
    }

    /// Default base URL of the OpenAI-compatible providers.
    fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::SiliconFlow => "https://api.siliconflow.cn/v1",
            Self::Grok => "https://api.x.ai/v1",
            Self::AzureOpenAi | Self::Gemini => "",
        }
    }

    fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

pub fn create_llm_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown LLM profile `{profile_name}`"))
    })?;
    create_llm_adapter_from_profile(profile)
}

pub fn create_llm_adapter_from_profile(
    profile: &LlmConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let provider = LlmProvider::parse(&profile.interface_format).ok_or_else(|| {
        AdapterError::InvalidConfig(format!(
            "unknown interface_format: {}",
            profile.interface_format
        ))
    })?;
    if provider.requires_api_key() && profile.api_key.trim().is_empty() {
        return Err(AdapterError::InvalidConfig(format!(
            "{provider:?} api_key must not be empty"
        )));
    }

    let settings = Sampling::from_profile(profile);
    let client = Client::builder()
        .timeout(Duration::from_secs(profile.timeout.max(1)))
        .build()?;

    match provider {
        LlmProvider::AzureOpenAi => Ok(Box::new(AzureOpenAiAdapter::new(
            client,
            profile.api_key.clone(),
            &profile.base_url,
            settings,
        )?)),
        LlmProvider::Gemini => Ok(Box::new(GeminiAdapter::new(
            client,
            &profile.api_key,
            &profile.base_url,
            &profile.model_name,
            settings,
        )?)),
        _ => Ok(Box::new(OpenAiCompatibleAdapter::new(
            client,
            resolve_base_url(&profile.base_url, provider.default_base_url()),
            &profile.api_key,
            &profile.model_name,
            settings,
        )?)),
    }
}

#[derive(Clone, Copy, Debug)]
struct Sampling {
    max_tokens: Option<u32>,
    temperature: f32,
}

impl Sampling {
    fn from_profile(profile: &LlmConfig) -> Self {
        Self {
            max_tokens: (profile.max_tokens > 0).then_some(profile.max_tokens),
            temperature: profile.temperature,
        }
    }
}

struct OpenAiCompatibleAdapter {
    client: Client,
    url: String,
    api_key: Option<String>,
    model_name: String,
    sampling: Sampling,
    retry: RetryConfig,
}

impl OpenAiCompatibleAdapter {
    fn new(
        client: Client,
        base_url: String,
        api_key: &str,
        model_name: &str,
        sampling: Sampling,
    ) -> Result<Self, AdapterError> {
        if base_url.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }
        if model_name.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "model_name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            client,
            url: join_endpoint(&base_url, "chat/completions"),
            api_key: Some(api_key.trim().to_string()).filter(|key| !key.is_empty()),
            model_name: model_name.trim().to_string(),
            sampling,
            retry: RetryConfig::default(),
        })
    }

    fn invoke_once(&self, prompt: &str, system: Option<&str>) -> Result<String, AdapterError> {
        let body = ChatCompletionRequest {
            model: Some(&self.model_name),
            messages: chat_messages(prompt, system),
            max_tokens: self.sampling.max_tokens,
            temperature: Some(self.sampling.temperature),
        };
        let mut request = json_post(&self.client, &self.url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        handle_chat_response(request.json(&body).send()?)
    }
}

impl LanguageModel for OpenAiCompatibleAdapter {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        self.invoke_with_system(prompt, None)
    }

    fn invoke_with_system(
        &self,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        debug!("chat completion via {} ({})", self.url, self.model_name);
        Ok(call_with_retry("chat", &self.retry, || {
            self.invoke_once(prompt, system_message)
        })?)
    }
}

struct AzureOpenAiAdapter {
    client: Client,
    url: String,
    api_key: HeaderValue,
    sampling: Sampling,
    retry: RetryConfig,
}

static AZURE_CHAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https://([^/]+)/openai/deployments/([^/]+)/chat/completions\?api-version=([^/?&]+)",
    )
    .expect("invalid azure url regex")
});

impl AzureOpenAiAdapter {
    fn new(
        client: Client,
        api_key: String,
        base_url: &str,
        sampling: Sampling,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client,
            url: azure_chat_url(base_url)?,
            api_key: HeaderValue::from_str(api_key.trim()).map_err(|err| {
                AdapterError::InvalidConfig(format!("invalid api key header: {err}"))
            })?,
            sampling,
            retry: RetryConfig::default(),
        })
    }

    fn invoke_once(&self, prompt: &str, system: Option<&str>) -> Result<String, AdapterError> {
        let body = ChatCompletionRequest {
            model: None,
            messages: chat_messages(prompt, system),
            max_tokens: self.sampling.max_tokens,
            temperature: Some(self.sampling.temperature),
        };
        let response = json_post(&self.client, &self.url)
            .header("api-key", self.api_key.clone())
            .json(&body)
            .send()?;
        handle_chat_response(response)
    }
}

impl LanguageModel for AzureOpenAiAdapter {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        self.invoke_with_system(prompt, None)
    }

    fn invoke_with_system(
        &self,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        Ok(call_with_retry("azure-openai", &self.retry, || {
            self.invoke_once(prompt, system_message)
        })?)
    }
}

/// Validates and canonicalizes an Azure OpenAI deployment URL.
fn azure_chat_url(base_url: &str) -> Result<String, AdapterError> {
    let captures = AZURE_CHAT_RE.captures(base_url.trim()).ok_or_else(|| {
        AdapterError::InvalidConfig(
            "Invalid Azure OpenAI base_url format. Expected https://<resource>.openai.azure.com/openai/deployments/<deployment>/chat/completions?api-version=<version>"
                .to_string(),
        )
    })?;
    Ok(format!(
        "https://{}/openai/deployments/{}/chat/completions?api-version={}",
        &captures[1], &captures[2], &captures[3]
    ))
}

struct GeminiAdapter {
    client: Client,
    url: String,
    sampling: Sampling,
    retry: RetryConfig,
}

impl GeminiAdapter {
    fn new(
        client: Client,
        api_key: &str,
        base_url: &str,
        model_name: &str,
        sampling: Sampling,
    ) -> Result<Self, AdapterError> {
        if model_name.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "Gemini model_name must not be empty".to_string(),
            ));
        }
        let base = if base_url.trim().is_empty() {
            GEMINI_DEFAULT_BASE
        } else {
            base_url.trim()
        };

        Ok(Self {
            client,
            url: format!(
                "{}?key={}",
                join_endpoint(base, &format!("models/{}:generateContent", model_name.trim())),
                api_key.trim()
            ),
            sampling,
            retry: RetryConfig::new(3, Duration::from_secs(5), Duration::from_secs(60)),
        })
    }

    fn invoke_once(&self, prompt: &str, system: Option<&str>) -> Result<String, AdapterError> {
        let request = GeminiRequest {
            contents: vec![GeminiRequestContent {
                role: "user",
                parts: vec![GeminiRequestPart { text: prompt }],
            }],
            system_instruction: system.map(|text| GeminiSystemInstruction {
                parts: vec![GeminiRequestPart { text }],
            }),
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.sampling.max_tokens,
                temperature: self.sampling.temperature,
            },
        };

        let response = json_post(&self.client, &self.url).json(&request).send()?;
        let response = ensure_success(response)?;
        parse_gemini_response(response.json()?)
    }
}

impl LanguageModel for GeminiAdapter {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        self.invoke_with_system(prompt, None)
    }

    fn invoke_with_system(
        &self,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        Ok(call_with_retry("gemini", &self.retry, || {
            self.invoke_once(prompt, system_message)
        })?)
    }
}

fn json_post(client: &Client, url: &str) -> RequestBuilder {
    client.post(url).header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    )
}

pub(crate) fn ensure_success(response: Response) -> Result<Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(AdapterError::HttpStatus { status, body })
}

fn handle_chat_response(response: Response) -> Result<String, AdapterError> {
    let parsed: ChatCompletionResponse = ensure_success(response)?.json()?;
    extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
}

fn chat_messages<'a>(prompt: &'a str, system: Option<&'a str>) -> Vec<ChatMessageRequest<'a>> {
    system
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|content| ChatMessageRequest {
            role: "system",
            content,
        })
        .into_iter()
        .chain(std::iter::once(ChatMessageRequest {
            role: "user",
            content: prompt,
        }))
        .collect()
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, PartialEq)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    response.choices.into_iter().find_map(|choice| {
        choice
            .message
            .and_then(|message| message.content)
            .or(choice.text)
            .filter(|content| !content.trim().is_empty())
    })
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiRequestContent<'a>>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiRequestContent<'a> {
    role: &'static str,
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction<'a> {
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

fn parse_gemini_response(response: GeminiResponse) -> Result<String, AdapterError> {
    for candidate in response.candidates {
        match candidate.finish_reason.as_deref() {
            Some("MAX_TOKENS") => warn!("Gemini response truncated due to max_tokens limit"),
            Some("SAFETY") => warn!("Gemini response blocked by safety filters"),
            Some("RECITATION") => warn!("Gemini response blocked due to recitation concerns"),
            _ => {}
        }
        let text: String = candidate
            .content
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
            .unwrap_or_default();
        if !text.trim().is_empty() {
            return Ok(text);
        }
    }
    Err(AdapterError::EmptyResponse)
}
