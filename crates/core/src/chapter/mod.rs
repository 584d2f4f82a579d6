use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blueprint::{lookup_chapter_info, parse_chapter_info, ChapterBlueprintEntry};
use crate::error::ErrorKind;
use crate::generation::{invoke_cleaned, LanguageModel, LanguageModelError, ModelCall};
use crate::knowledge::KnowledgeBase;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::project::{ArtifactSlot, ProjectError, ProjectStore};
use crate::prompts::{PromptArguments, PromptError, PromptRegistry};
use crate::running::RunningDocumentError;

mod finalization;
mod prompt;
mod summary;

pub use finalization::FinalizeOutcome;

use prompt::{
    first_chapter_arguments, insert_entry, insert_next_entry, knowledge_query,
    next_chapter_arguments, StoryContext, NO_KNOWLEDGE_PLACEHOLDER,
};
use summary::{extract_summary, RecentChapters};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChapterStage {
    Draft,
    Summary,
    Optimize,
}

impl ChapterStage {
    fn label(&self) -> &'static str {
        match self {
            Self::Draft => "章节草稿",
            Self::Summary => "前文摘要",
            Self::Optimize => "章节定稿",
        }
    }
}

impl fmt::Display for ChapterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum ChapterError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error("章节号必须从 1 开始，收到 {0}")]
    InvalidChapterNumber(u32),
    #[error("缺少前置产物：{slot}")]
    MissingPrerequisite { slot: ArtifactSlot },
    #[error("第 {0} 章不存在")]
    ChapterNotFound(u32),
    #[error("第 {0} 章草稿为空")]
    EmptyDraft(u32),
    #[error("渲染{stage}提示词失败: {source}")]
    Prompt {
        stage: ChapterStage,
        #[source]
        source: PromptError,
    },
    #[error("{stage}调用 LLM 失败: {source}")]
    Model {
        stage: ChapterStage,
        #[source]
        source: LanguageModelError,
    },
    #[error("{stage}返回内容为空")]
    EmptyResponse { stage: ChapterStage },
    #[error(transparent)]
    RunningDocument(#[from] RunningDocumentError),
}

impl ChapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Project(err) => err.kind(),
            Self::RunningDocument(err) => err.kind(),
            Self::InvalidChapterNumber(_)
            | Self::MissingPrerequisite { .. }
            | Self::ChapterNotFound(_)
            | Self::EmptyDraft(_) => ErrorKind::PrerequisiteMissing,
            Self::Prompt { .. } | Self::Model { .. } | Self::EmptyResponse { .. } => {
                ErrorKind::GenerationFailure
            }
        }
    }
}

/// Per-draft hints supplied by the author. Blank hints are left out of the
/// retrieval query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChapterDraftRequest {
    pub chapter_number: u32,
    pub user_guidance: String,
    pub characters_involved: String,
    pub key_items: String,
    pub scene_location: String,
    pub time_constraint: String,
}

impl ChapterDraftRequest {
    pub fn new(chapter_number: u32) -> Self {
        Self {
            chapter_number,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterDraft {
    pub chapter_number: u32,
    pub content: String,
    pub outline: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub number: u32,
    pub content: String,
    pub outline: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterListEntry {
    pub number: u32,
    pub outline: String,
    pub has_content: bool,
}

/// Drafts and finalizes chapters, keeping the running documents and the
/// knowledge index in step with the text.
pub struct ChapterService<'a> {
    store: &'a ProjectStore,
    prompts: &'a PromptRegistry,
    knowledge: &'a dyn KnowledgeBase,
    sink: &'a dyn LogSink,
    max_retries: usize,
}

impl<'a> ChapterService<'a> {
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

    pub fn generate_draft<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        request: &ChapterDraftRequest,
    ) -> Result<ChapterDraft, ChapterError> {
        let number = validate_chapter_number(request.chapter_number)?;
        self.store
            .exclusive(project_id, || self.generate_draft_locked(model, project_id, number, request))
    }

    fn generate_draft_locked<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        number: u32,
        request: &ChapterDraftRequest,
    ) -> Result<ChapterDraft, ChapterError> {
        let project = self.store.get(project_id)?;
        let architecture = self.require_slot(project_id, ArtifactSlot::ArchitectureFinal)?;
        let blueprint = self.require_slot(project_id, ArtifactSlot::Blueprint)?;

        let lookup = lookup_chapter_info(&blueprint, number);
        if lookup.is_fallback() {
            self.log(
                LogLevel::Warn,
                format!("章节目录中没有第{number}章的信息，使用默认设定"),
            );
        }
        let entry = lookup.into_entry();
        let word_number = project.target_words_per_chapter;

        let (key, args, system_message) = if number == 1 {
            let args = first_chapter_arguments(&entry, request, word_number, &architecture);
            let system = self
                .prompts
                .format_with("first_chapter_system", PromptArguments::new())
                .map_err(|source| ChapterError::Prompt {
                    stage: ChapterStage::Draft,
                    source,
                })?;
            ("first_chapter_draft", args, Some(system))
        } else {
            let next = parse_chapter_info(&blueprint, number.saturating_add(1));
            let context = self.story_context(model, project_id, &entry, &next, request)?;
            let args = next_chapter_arguments(&entry, &next, request, word_number, context);
            ("next_chapter_draft", args, None)
        };

        let prompt = self
            .prompts
            .format(key, &args)
            .map_err(|source| ChapterError::Prompt {
                stage: ChapterStage::Draft,
                source,
            })?;
        self.log(LogLevel::Info, format!("开始生成第{number}章草稿《{}》", entry.chapter_title));
        let content = self.invoke(model, ChapterStage::Draft, &prompt, system_message.as_deref())?;

        let outline = entry.outline();
        self.store
            .write_slot(project_id, ArtifactSlot::ChapterDraft(number), &content)?;
        self.store
            .write_slot(project_id, ArtifactSlot::ChapterOutline(number), &outline)?;
        self.store.touch(project_id)?;
        self.log(LogLevel::Info, format!("第{number}章草稿已保存"));

        Ok(ChapterDraft {
            chapter_number: number,
            content,
            outline,
        })
    }

    fn story_context<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        entry: &ChapterBlueprintEntry,
        next: &ChapterBlueprintEntry,
        request: &ChapterDraftRequest,
    ) -> Result<StoryContext, ChapterError> {
        let recent = RecentChapters::load(self.store, project_id, entry.chapter_number)?;
        let short_summary = if recent.is_empty() {
            String::new()
        } else {
            self.short_summary(model, entry, next, &recent.combined())
        };

        let query = knowledge_query(entry, request);
        let hits = if query.is_empty() {
            Vec::new()
        } else {
            self.knowledge.search(project_id, &query)
        };
        let filtered_context = if hits.is_empty() {
            NO_KNOWLEDGE_PLACEHOLDER.to_string()
        } else {
            hits.iter()
                .map(|doc| doc.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        Ok(StoryContext {
            global_summary: self
                .store
                .read_slot_or_empty(project_id, ArtifactSlot::GlobalSummary)?,
            character_state: self
                .store
                .read_slot_or_empty(project_id, ArtifactSlot::CharacterState)?,
            previous_excerpt: recent.previous_excerpt(),
            short_summary,
            filtered_context,
        })
    }

    /// Best effort: a failed or unusable summary call yields an empty summary.
    fn short_summary<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        entry: &ChapterBlueprintEntry,
        next: &ChapterBlueprintEntry,
        combined_text: &str,
    ) -> String {
        let mut args = PromptArguments::new();
        insert_entry(&mut args, entry);
        insert_next_entry(&mut args, next);
        args.insert("combined_text".into(), combined_text.to_string());

        let result = self
            .prompts
            .format("summarize_recent_chapters", &args)
            .map_err(|source| ChapterError::Prompt {
                stage: ChapterStage::Summary,
                source,
            })
            .and_then(|prompt| self.invoke(model, ChapterStage::Summary, &prompt, None));
        match result {
            Ok(response) => extract_summary(&response),
            Err(err) => {
                self.log(LogLevel::Warn, format!("生成前文摘要失败，将不带摘要继续：{err}"));
                String::new()
            }
        }
    }

    pub fn chapter(&self, project_id: &str, number: u32) -> Result<ChapterContent, ChapterError> {
        self.store.get(project_id)?;
        let content = self
            .store
            .read_slot(project_id, ArtifactSlot::ChapterDraft(number))?
            .ok_or(ChapterError::ChapterNotFound(number))?;
        let outline = self
            .store
            .read_slot_or_empty(project_id, ArtifactSlot::ChapterOutline(number))?;
        Ok(ChapterContent {
            number,
            content,
            outline,
        })
    }

    /// One row per planned chapter, extended to the highest stored draft.
    pub fn list_chapters(&self, project_id: &str) -> Result<Vec<ChapterListEntry>, ChapterError> {
        let project = self.store.get(project_id)?;
        let stored: BTreeSet<u32> = self
            .store
            .stored_chapter_numbers(project_id)?
            .into_iter()
            .collect();
        let last = stored
            .iter()
            .next_back()
            .copied()
            .unwrap_or(0)
            .max(project.chapter_count);

        (1..=last)
            .map(|number| {
                Ok(ChapterListEntry {
                    number,
                    outline: self
                        .store
                        .read_slot_or_empty(project_id, ArtifactSlot::ChapterOutline(number))?,
                    has_content: stored.contains(&number),
                })
            })
            .collect()
    }

    /// Replaces the stored text of a chapter, e.g. after manual editing.
    pub fn save_content(
        &self,
        project_id: &str,
        number: u32,
        content: &str,
    ) -> Result<(), ChapterError> {
        let number = validate_chapter_number(number)?;
        self.store.exclusive(project_id, || {
            self.store.get(project_id)?;
            self.store
                .write_slot(project_id, ArtifactSlot::ChapterDraft(number), content)?;
            self.store.touch(project_id)?;
            self.log(LogLevel::Info, format!("第{number}章内容已保存"));
            Ok(())
        })
    }

    fn require_slot(&self, project_id: &str, slot: ArtifactSlot) -> Result<String, ChapterError> {
        let text = self.store.read_slot_or_empty(project_id, slot)?;
        if text.trim().is_empty() {
            return Err(ChapterError::MissingPrerequisite { slot });
        }
        Ok(text)
    }

    fn invoke<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        stage: ChapterStage,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, ChapterError> {
        let text = invoke_cleaned(
            model,
            self.sink,
            ModelCall {
                label: stage.label(),
                prompt,
                system_message,
                max_attempts: self.max_retries,
            },
        )
        .map_err(|source| ChapterError::Model { stage, source })?;
        if text.is_empty() {
            return Err(ChapterError::EmptyResponse { stage });
        }
        Ok(text)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

fn validate_chapter_number(number: u32) -> Result<u32, ChapterError> {
    if number == 0 {
        Err(ChapterError::InvalidChapterNumber(number))
    } else {
        Ok(number)
    }
}
