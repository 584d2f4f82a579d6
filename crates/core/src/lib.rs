pub mod architecture;
pub mod blueprint;
pub mod chapter;
pub mod config;
pub mod embedding;
pub mod error;
pub(crate) mod fsio;
pub mod generation;
pub mod knowledge;
pub mod logging;
pub mod project;
pub mod prompts;
pub mod running;

#[cfg(test)]
mod testing;

pub use architecture::{
    render_architecture, ArchitectureError, ArchitectureOutcome, ArchitectureService,
    ArchitectureStage, ArchitectureState,
};
pub use blueprint::{
    lookup_chapter_info, parse_chapter_blueprint, parse_chapter_info, BlueprintError,
    BlueprintLookup, ChapterBlueprintEntry, ChapterBlueprintService,
};
pub use chapter::{
    ChapterContent, ChapterDraft, ChapterDraftRequest, ChapterError, ChapterListEntry,
    ChapterService, ChapterStage, FinalizeOutcome,
};
pub use config::{
    Config, ConfigError, ConfigStore, EmbeddingConfig, LlmConfig, PromptConfig, RecentUsage,
    StorageConfig,
};
pub use embedding::{ensure_embeddable, EmbeddingInputError, EmbeddingModel, EmbeddingModelError};
pub use error::ErrorKind;
pub use generation::{LanguageModel, LanguageModelError, LanguageModelErrorKind};
pub use knowledge::{
    clear_index, import_knowledge, DisabledKnowledgeBase, DocumentMetadata, DocumentType,
    KnowledgeBase, KnowledgeDocument, KnowledgeError, KnowledgeIndex,
};
pub use logging::{
    LogFacadeSink, LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, VecLogSink,
};
pub use project::{
    ArtifactSlot, NewProject, Project, ProjectError, ProjectService, ProjectStatus, ProjectStore,
};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptTemplate};
pub use running::{RunningDocument, RunningDocumentError, RunningDocumentService};
