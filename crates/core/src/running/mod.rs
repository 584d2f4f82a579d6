//! The two documents rewritten as the story advances: the global summary and
//! the character state.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::generation::{invoke_cleaned, LanguageModel, LanguageModelError, ModelCall};
use crate::knowledge::{ingest, DocumentMetadata, DocumentType, KnowledgeBase};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::project::{ArtifactSlot, ProjectError, ProjectStore};
use crate::prompts::{PromptError, PromptRegistry};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RunningDocument {
    GlobalSummary,
    CharacterState,
}

impl RunningDocument {
    pub fn slot(&self) -> ArtifactSlot {
        match self {
            Self::GlobalSummary => ArtifactSlot::GlobalSummary,
            Self::CharacterState => ArtifactSlot::CharacterState,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::GlobalSummary => "全局摘要",
            Self::CharacterState => "角色状态",
        }
    }

    fn doc_type(&self) -> DocumentType {
        match self {
            Self::GlobalSummary => DocumentType::GlobalSummary,
            Self::CharacterState => DocumentType::CharacterState,
        }
    }

    fn revise_prompt(
        &self,
        previous: &str,
        chapter_text: &str,
    ) -> (&'static str, [(&'static str, String); 2]) {
        match self {
            Self::GlobalSummary => (
                "summary",
                [
                    ("chapter_text", chapter_text.to_string()),
                    ("global_summary", previous.to_string()),
                ],
            ),
            Self::CharacterState => (
                "update_character_state",
                [
                    ("chapter_text", chapter_text.to_string()),
                    ("old_state", previous.to_string()),
                ],
            ),
        }
    }
}

impl fmt::Display for RunningDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum RunningDocumentError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error("缺少前置产物：{slot}")]
    MissingPrerequisite { slot: ArtifactSlot },
    #[error("小说架构中找不到「{section}」部分")]
    MissingSection { section: &'static str },
    #[error("渲染{document}提示词失败: {source}")]
    Prompt {
        document: RunningDocument,
        #[source]
        source: PromptError,
    },
    #[error("生成{document}时 LLM 调用失败: {source}")]
    Model {
        document: RunningDocument,
        #[source]
        source: LanguageModelError,
    },
    #[error("{document}生成结果为空")]
    EmptyResponse { document: RunningDocument },
}

impl RunningDocumentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Project(err) => err.kind(),
            Self::MissingPrerequisite { .. } | Self::MissingSection { .. } => {
                ErrorKind::PrerequisiteMissing
            }
            Self::Prompt { .. } | Self::Model { .. } | Self::EmptyResponse { .. } => {
                ErrorKind::GenerationFailure
            }
        }
    }
}

/// Extracts the character-dynamics section of a final architecture.
pub fn character_dynamics_section(architecture: &str) -> Option<&str> {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = REGEX.get_or_init(|| {
        Regex::new(r"#=== 2\) 角色动力学 ===\n([\s\S]*?)\n\n#===")
            .expect("invalid character dynamics regex")
    });
    regex
        .captures(architecture)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|section| !section.is_empty())
}

pub struct RunningDocumentService<'a> {
    store: &'a ProjectStore,
    prompts: &'a PromptRegistry,
    knowledge: &'a dyn KnowledgeBase,
    sink: &'a dyn LogSink,
    max_retries: usize,
}

impl<'a> RunningDocumentService<'a> {
    pub fn new(
        store: &'a ProjectStore,
        prompts: &'a PromptRegistry,
        knowledge: &'a dyn KnowledgeBase,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            store,
            prompts,
            knowledge,
            sink,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Folds a finalized chapter into `previous`. A blank answer keeps the
    /// previous version. Nothing is written.
    pub fn revise<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        document: RunningDocument,
        previous: &str,
        chapter_text: &str,
    ) -> Result<String, RunningDocumentError> {
        let (key, arguments) = document.revise_prompt(previous, chapter_text);
        let revised = self.invoke(model, document, key, arguments)?;
        if revised.is_empty() {
            self.log(
                LogLevel::Warn,
                format!("{document}更新结果为空，保留原有内容"),
            );
            return Ok(previous.to_string());
        }
        Ok(revised)
    }

    /// Rebuilds the character state from the architecture's character
    /// dynamics section.
    pub fn regenerate_character_state<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        user_guidance: &str,
    ) -> Result<String, RunningDocumentError> {
        self.store.exclusive(project_id, || {
            let architecture = self.require_architecture(project_id)?;
            let dynamics = character_dynamics_section(&architecture).ok_or(
                RunningDocumentError::MissingSection {
                    section: "角色动力学",
                },
            )?;
            let document = RunningDocument::CharacterState;
            let state = self.invoke(
                model,
                document,
                "regenerate_character_state",
                [
                    ("character_dynamics", dynamics.to_string()),
                    ("user_guidance", user_guidance.trim().to_string()),
                ],
            )?;
            self.store_regenerated(project_id, document, state)
        })
    }

    /// Rebuilds the global summary from the architecture and, when present,
    /// the blueprint.
    pub fn regenerate_global_summary<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        user_guidance: &str,
    ) -> Result<String, RunningDocumentError> {
        self.store.exclusive(project_id, || {
            let architecture = self.require_architecture(project_id)?;
            let blueprint = self
                .store
                .read_slot_or_empty(project_id, ArtifactSlot::Blueprint)?;
            let document = RunningDocument::GlobalSummary;
            let summary = self.invoke(
                model,
                document,
                "global_summary",
                [
                    ("novel_architecture", architecture),
                    ("chapter_blueprint", blueprint.trim().to_string()),
                    ("user_guidance", user_guidance.trim().to_string()),
                ],
            )?;
            self.store_regenerated(project_id, document, summary)
        })
    }

    fn require_architecture(&self, project_id: &str) -> Result<String, RunningDocumentError> {
        self.store.get(project_id)?;
        let architecture = self
            .store
            .read_slot_or_empty(project_id, ArtifactSlot::ArchitectureFinal)?;
        if architecture.trim().is_empty() {
            return Err(RunningDocumentError::MissingPrerequisite {
                slot: ArtifactSlot::ArchitectureFinal,
            });
        }
        Ok(architecture.trim().to_string())
    }

    fn store_regenerated(
        &self,
        project_id: &str,
        document: RunningDocument,
        text: String,
    ) -> Result<String, RunningDocumentError> {
        if text.is_empty() {
            return Err(RunningDocumentError::EmptyResponse { document });
        }
        self.store.write_slot(project_id, document.slot(), &text)?;
        self.store.touch(project_id)?;
        ingest(
            self.knowledge,
            self.sink,
            &text,
            DocumentMetadata::new(document.doc_type(), project_id),
        );
        self.log(LogLevel::Info, format!("{document}已重新生成"));
        Ok(text)
    }

    fn invoke<M, I>(
        &self,
        model: &M,
        document: RunningDocument,
        key: &str,
        arguments: I,
    ) -> Result<String, RunningDocumentError>
    where
        M: LanguageModel + ?Sized,
        I: IntoIterator<Item = (&'static str, String)>,
    {
        let prompt = self
            .prompts
            .format_with(key, arguments)
            .map_err(|source| RunningDocumentError::Prompt { document, source })?;
        invoke_cleaned(
            model,
            self.sink,
            ModelCall {
                label: document.label(),
                prompt: &prompt,
                system_message: None,
                max_attempts: self.max_retries,
            },
        )
        .map_err(|source| RunningDocumentError::Model { document, source })
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}
