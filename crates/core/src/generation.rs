use std::error::Error as StdError;
use std::fmt;

use crate::logging::{LogLevel, LogRecord, LogSink};

/// How a text-generation failure should be read by callers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LanguageModelErrorKind {
    /// The provider could not be reached or rejected the request.
    Provider,
    /// The provider answered but the payload could not be understood.
    MalformedResponse,
}

#[derive(Debug)]
pub struct LanguageModelError {
    kind: LanguageModelErrorKind,
    inner: Box<dyn StdError + Send + Sync>,
}

impl LanguageModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::with_kind(LanguageModelErrorKind::Provider, error)
    }

    pub fn malformed<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::with_kind(LanguageModelErrorKind::MalformedResponse, error)
    }

    pub fn with_kind<E>(kind: LanguageModelErrorKind, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            kind,
            inner: Box::new(error),
        }
    }

    pub fn kind(&self) -> LanguageModelErrorKind {
        self.kind
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }

    pub fn as_inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Text-generation capability. Implementations may block for a long time.
pub trait LanguageModel: Send + Sync {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError>;

    /// Sends `prompt` with an optional system message. Providers without a
    /// dedicated system role receive the system text prepended to the prompt.
    fn invoke_with_system(
        &self,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        match system_message.map(str::trim).filter(|text| !text.is_empty()) {
            Some(system) => self.invoke(&format!("{system}\n\n{prompt}")),
            None => self.invoke(prompt),
        }
    }
}

impl<T: LanguageModel + ?Sized> LanguageModel for Box<T> {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        (**self).invoke(prompt)
    }

    fn invoke_with_system(
        &self,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        (**self).invoke_with_system(prompt, system_message)
    }
}

/// A single model call as seen by the retry loop in [`invoke_cleaned`].
pub(crate) struct ModelCall<'a> {
    pub label: &'a str,
    pub prompt: &'a str,
    pub system_message: Option<&'a str>,
    pub max_attempts: usize,
}

/// Calls the model until it returns non-blank text with code fences removed.
///
/// Provider errors on the last attempt are returned; a run of blank answers
/// yields `Ok(String::new())` and the caller decides whether that is fatal.
pub(crate) fn invoke_cleaned<M: LanguageModel + ?Sized>(
    model: &M,
    sink: &dyn LogSink,
    call: ModelCall<'_>,
) -> Result<String, LanguageModelError> {
    let attempts = call.max_attempts.max(1);
    for attempt in 1..=attempts {
        sink.log(LogRecord::new(
            LogLevel::Debug,
            format!(
                "发送到 LLM 的提示词（{}｜第{}次尝试）：\n{}",
                call.label, attempt, call.prompt
            ),
        ));

        match model.invoke_with_system(call.prompt, call.system_message) {
            Ok(response) => {
                sink.log(LogRecord::new(
                    LogLevel::Debug,
                    format!(
                        "LLM 返回的内容（{}｜第{}次尝试）：\n{}",
                        call.label, attempt, response
                    ),
                ));
                let cleaned = clean_response(&response);
                if !cleaned.is_empty() {
                    return Ok(cleaned);
                }
                sink.log(LogRecord::new(
                    LogLevel::Warn,
                    format!(
                        "LLM 返回空响应，准备重试（{}｜第{}次尝试）",
                        call.label, attempt
                    ),
                ));
            }
            Err(err) => {
                sink.log(LogRecord::new(
                    LogLevel::Warn,
                    format!("LLM 调用失败（{}｜第{}次尝试）：{}", call.label, attempt, err),
                ));
                if attempt == attempts {
                    return Err(err);
                }
            }
        }
    }

    Ok(String::new())
}

pub(crate) fn clean_response(response: &str) -> String {
    response.replace("```", "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::VecLogSink;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    struct Scripted {
        responses: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<&str, &str>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl LanguageModel for Scripted {
        fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(LanguageModelError::new(io::Error::new(
                    io::ErrorKind::Other,
                    message,
                ))),
                None => Err(LanguageModelError::new(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "script exhausted",
                ))),
            }
        }
    }

    fn call<'a>(prompt: &'a str, system: Option<&'a str>, attempts: usize) -> ModelCall<'a> {
        ModelCall {
            label: "测试",
            prompt,
            system_message: system,
            max_attempts: attempts,
        }
    }

    #[test]
    fn strips_fences_and_retries_blank_answers() {
        let model = Scripted::new(vec![Ok("  ```  "), Ok("```\n正文\n```")]);
        let sink = VecLogSink::new();
        let text = invoke_cleaned(&model, &sink, call("提示", None, 3)).unwrap();
        assert_eq!(text, "正文");
        assert!(sink.contains(LogLevel::Warn, "空响应"));
    }

    #[test]
    fn returns_last_error_after_exhausting_attempts() {
        let model = Scripted::new(vec![Err("boom"), Err("still down")]);
        let sink = VecLogSink::new();
        let err = invoke_cleaned(&model, &sink, call("提示", None, 2)).unwrap_err();
        assert_eq!(err.to_string(), "still down");
        assert_eq!(err.kind(), LanguageModelErrorKind::Provider);
    }

    #[test]
    fn blank_answers_only_yield_empty_string() {
        let model = Scripted::new(vec![Ok(""), Ok("   ")]);
        let sink = VecLogSink::new();
        let text = invoke_cleaned(&model, &sink, call("提示", None, 2)).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn default_system_message_is_prepended() {
        let model = Scripted::new(vec![Ok("好")]);
        model
            .invoke_with_system("写第一章", Some("你是作家"))
            .unwrap();
        let prompts = model.prompts.lock().unwrap().clone();
        assert_eq!(prompts, vec!["你是作家\n\n写第一章".to_string()]);
    }
}
