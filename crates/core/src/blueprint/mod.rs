use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::generation::{invoke_cleaned, LanguageModel, LanguageModelError, ModelCall};
use crate::knowledge::{ingest, DocumentMetadata, DocumentType, KnowledgeBase};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::project::{ArtifactSlot, ProjectError, ProjectStatus, ProjectStore};
use crate::prompts::{PromptError, PromptRegistry};

pub const DEFAULT_CHAPTER_ROLE: &str = "常规章节";
pub const DEFAULT_CHAPTER_PURPOSE: &str = "内容推进";
pub const DEFAULT_SUSPENSE_LEVEL: &str = "中等";
pub const DEFAULT_FORESHADOWING: &str = "无";
pub const DEFAULT_PLOT_TWIST_LEVEL: &str = "★☆☆☆☆";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterBlueprintEntry {
    pub chapter_number: u32,
    pub chapter_title: String,
    pub chapter_role: String,
    pub chapter_purpose: String,
    pub suspense_level: String,
    pub foreshadowing: String,
    pub plot_twist_level: String,
    pub chapter_summary: String,
}

impl ChapterBlueprintEntry {
    /// Entry used when the blueprint has nothing for chapter `number`.
    pub fn fallback(number: u32) -> Self {
        Self {
            chapter_number: number,
            chapter_title: format!("第{number}章"),
            chapter_role: DEFAULT_CHAPTER_ROLE.to_string(),
            chapter_purpose: DEFAULT_CHAPTER_PURPOSE.to_string(),
            suspense_level: DEFAULT_SUSPENSE_LEVEL.to_string(),
            foreshadowing: DEFAULT_FORESHADOWING.to_string(),
            plot_twist_level: DEFAULT_PLOT_TWIST_LEVEL.to_string(),
            chapter_summary: String::new(),
        }
    }

    /// The outline persisted next to a chapter draft.
    pub fn outline(&self) -> String {
        format!(
            "第{}章《{}》\n本章定位：{}\n核心作用：{}\n悬念密度：{}\n伏笔操作：{}\n认知颠覆：{}\n本章简述：{}",
            self.chapter_number,
            self.chapter_title,
            self.chapter_role,
            self.chapter_purpose,
            self.suspense_level,
            self.foreshadowing,
            self.plot_twist_level,
            self.chapter_summary
        )
    }
}

/// Result of looking a chapter up in the blueprint text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlueprintLookup {
    Parsed(ChapterBlueprintEntry),
    /// No record for the chapter; every field holds its default.
    Fallback(ChapterBlueprintEntry),
}

impl BlueprintLookup {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    pub fn entry(&self) -> &ChapterBlueprintEntry {
        match self {
            Self::Parsed(entry) | Self::Fallback(entry) => entry,
        }
    }

    pub fn into_entry(self) -> ChapterBlueprintEntry {
        match self {
            Self::Parsed(entry) | Self::Fallback(entry) => entry,
        }
    }
}

pub fn parse_chapter_info(blueprint: &str, chapter_number: u32) -> ChapterBlueprintEntry {
    lookup_chapter_info(blueprint, chapter_number).into_entry()
}

pub fn lookup_chapter_info(blueprint: &str, chapter_number: u32) -> BlueprintLookup {
    match parse_chapter_blueprint(blueprint)
        .into_iter()
        .find(|entry| entry.chapter_number == chapter_number)
    {
        Some(entry) => BlueprintLookup::Parsed(entry),
        None => BlueprintLookup::Fallback(ChapterBlueprintEntry::fallback(chapter_number)),
    }
}

/// Parses every record of a blueprint. A record starts at a `第N章 - 标题`
/// line and runs until the next such line; labelled lines that are missing
/// or blank keep their default value.
pub fn parse_chapter_blueprint(text: &str) -> Vec<ChapterBlueprintEntry> {
    let mut entries = Vec::new();
    let mut current: Option<ChapterBlueprintEntry> = None;

    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if let Some(header) = header_regex().captures(line) {
            let Some(number) = header
                .get(1)
                .and_then(|m| m.as_str().trim().parse::<u32>().ok())
            else {
                continue;
            };
            entries.extend(current.take());
            let mut entry = ChapterBlueprintEntry::fallback(number);
            if let Some(title) = non_empty_capture(header.get(2)) {
                entry.chapter_title = title;
            }
            current = Some(entry);
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        for (regex, field) in [
            (role_regex(), &mut entry.chapter_role),
            (purpose_regex(), &mut entry.chapter_purpose),
            (suspense_regex(), &mut entry.suspense_level),
            (foreshadow_regex(), &mut entry.foreshadowing),
            (twist_regex(), &mut entry.plot_twist_level),
            (summary_regex(), &mut entry.chapter_summary),
        ] {
            if let Some(caps) = regex.captures(line) {
                if let Some(value) = non_empty_capture(caps.get(1)) {
                    *field = value;
                }
                break;
            }
        }
    }
    entries.extend(current);
    entries
}

fn non_empty_capture(capture: Option<regex::Match<'_>>) -> Option<String> {
    capture
        .map(|m| m.as_str().trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn header_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^第\s*(\d+)\s*章\s*-\s*\[?(.*?)\]?$").expect("invalid chapter header regex")
    })
}

fn role_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^本章定位[：:]\s*\[?(.*?)\]?$").expect("invalid role regex"))
}

fn purpose_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^核心作用[：:]\s*\[?(.*?)\]?$").expect("invalid purpose regex")
    })
}

fn suspense_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^悬念密度[：:]\s*\[?(.*?)\]?$").expect("invalid suspense regex")
    })
}

fn foreshadow_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^伏笔操作[：:]\s*\[?(.*?)\]?$").expect("invalid foreshadow regex")
    })
}

fn twist_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^认知颠覆[：:]\s*\[?(.*?)\]?$").expect("invalid twist regex"))
}

fn summary_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^本章简述[：:]\s*\[?(.*?)\]?$").expect("invalid summary regex")
    })
}

#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error("缺少前置产物：{slot}")]
    MissingPrerequisite { slot: ArtifactSlot },
    #[error("渲染章节目录提示词失败: {0}")]
    Prompt(#[source] PromptError),
    #[error("生成章节目录时 LLM 调用失败: {0}")]
    Model(#[source] LanguageModelError),
    #[error("章节目录生成结果为空")]
    EmptyResponse,
}

impl BlueprintError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Project(err) => err.kind(),
            Self::MissingPrerequisite { .. } => ErrorKind::PrerequisiteMissing,
            Self::Prompt(_) | Self::Model(_) | Self::EmptyResponse => ErrorKind::GenerationFailure,
        }
    }
}

/// Produces the chapter-by-chapter blueprint from the final architecture.
pub struct ChapterBlueprintService<'a> {
    store: &'a ProjectStore,
    prompts: &'a PromptRegistry,
    knowledge: &'a dyn KnowledgeBase,
    sink: &'a dyn LogSink,
    max_retries: usize,
}

impl<'a> ChapterBlueprintService<'a> {
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

    pub fn generate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        user_guidance: &str,
    ) -> Result<String, BlueprintError> {
        self.store
            .exclusive(project_id, || self.generate_locked(model, project_id, user_guidance))
    }

    fn generate_locked<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        user_guidance: &str,
    ) -> Result<String, BlueprintError> {
        let project = self.store.get(project_id)?;
        let architecture = self
            .store
            .read_slot_or_empty(project_id, ArtifactSlot::ArchitectureFinal)?;
        if architecture.trim().is_empty() {
            return Err(BlueprintError::MissingPrerequisite {
                slot: ArtifactSlot::ArchitectureFinal,
            });
        }

        self.log(
            LogLevel::Info,
            format!("开始生成章节目录：共 {} 章", project.chapter_count),
        );
        let prompt = self
            .prompts
            .format_with(
                "chapter_blueprint",
                [
                    ("novel_architecture", architecture.trim().to_string()),
                    ("number_of_chapters", project.chapter_count.to_string()),
                    ("user_guidance", user_guidance.trim().to_string()),
                ],
            )
            .map_err(BlueprintError::Prompt)?;

        let blueprint = invoke_cleaned(
            model,
            self.sink,
            ModelCall {
                label: "章节目录",
                prompt: &prompt,
                system_message: None,
                max_attempts: self.max_retries,
            },
        )
        .map_err(BlueprintError::Model)?;
        if blueprint.is_empty() {
            return Err(BlueprintError::EmptyResponse);
        }

        self.store
            .write_slot(project_id, ArtifactSlot::Blueprint, &blueprint)?;
        self.store
            .advance_status(project_id, ProjectStatus::BlueprintGenerated)?;
        let parsed = parse_chapter_blueprint(&blueprint).len();
        if parsed < project.chapter_count as usize {
            self.log(
                LogLevel::Warn,
                format!(
                    "章节目录仅解析出 {parsed} 章（预期 {} 章），缺失章节将使用默认信息",
                    project.chapter_count
                ),
            );
        }
        ingest(
            self.knowledge,
            self.sink,
            &blueprint,
            DocumentMetadata::new(DocumentType::Blueprint, project_id),
        );
        self.log(LogLevel::Info, "章节目录生成完成");
        Ok(blueprint)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}
