use serde::{Deserialize, Serialize};

use crate::blueprint::parse_chapter_info;
use crate::generation::LanguageModel;
use crate::knowledge::{ingest, DocumentMetadata, DocumentType};
use crate::logging::LogLevel;
use crate::project::ArtifactSlot;
use crate::running::{RunningDocument, RunningDocumentService};

use super::prompt::optimize_arguments;
use super::summary::RecentChapters;
use super::{validate_chapter_number, ChapterError, ChapterService, ChapterStage};

/// Everything a finalization pass rewrote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub content: String,
    pub global_summary: String,
    pub character_state: String,
}

impl<'a> ChapterService<'a> {
    /// Polishes a stored draft, folds it into the running documents and
    /// indexes the result. Running it again on the same chapter repeats the
    /// whole pass on the already polished text.
    pub fn finalize<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        number: u32,
    ) -> Result<FinalizeOutcome, ChapterError> {
        let number = validate_chapter_number(number)?;
        self.store
            .exclusive(project_id, || self.finalize_locked(model, project_id, number))
    }

    fn finalize_locked<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        number: u32,
    ) -> Result<FinalizeOutcome, ChapterError> {
        self.store.get(project_id)?;
        let draft_slot = ArtifactSlot::ChapterDraft(number);
        let draft = self
            .store
            .read_slot(project_id, draft_slot)?
            .ok_or(ChapterError::MissingPrerequisite { slot: draft_slot })?;
        if draft.trim().is_empty() {
            return Err(ChapterError::EmptyDraft(number));
        }

        let architecture = self
            .store
            .read_slot_or_empty(project_id, ArtifactSlot::ArchitectureFinal)?;
        let blueprint = self
            .store
            .read_slot_or_empty(project_id, ArtifactSlot::Blueprint)?;
        let entry = parse_chapter_info(&blueprint, number);
        let previous_excerpt =
            RecentChapters::load(self.store, project_id, number)?.previous_excerpt();

        let args = optimize_arguments(&entry, &architecture, &previous_excerpt, &draft);
        let prompt = self
            .prompts
            .format("optimize_chapter", &args)
            .map_err(|source| ChapterError::Prompt {
                stage: ChapterStage::Optimize,
                source,
            })?;
        self.log(LogLevel::Info, format!("开始定稿第{number}章"));
        let content = self.invoke(model, ChapterStage::Optimize, &prompt, None)?;
        self.store.write_slot(project_id, draft_slot, &content)?;

        let running = RunningDocumentService::new(self.store, self.prompts, self.knowledge, self.sink)
            .with_max_retries(self.max_retries);
        let mut revised = Vec::with_capacity(2);
        for document in [RunningDocument::GlobalSummary, RunningDocument::CharacterState] {
            let previous = self.store.read_slot_or_empty(project_id, document.slot())?;
            let text = running.revise(model, document, &previous, &content)?;
            self.store.write_slot(project_id, document.slot(), &text)?;
            revised.push(text);
        }
        let character_state = revised.pop().unwrap_or_default();
        let global_summary = revised.pop().unwrap_or_default();
        self.store.touch(project_id)?;

        ingest(
            self.knowledge,
            self.sink,
            &content,
            DocumentMetadata::new(DocumentType::Chapter, project_id).with_chapter(number),
        );
        self.log(LogLevel::Info, format!("第{number}章定稿完成"));

        Ok(FinalizeOutcome {
            content,
            global_summary,
            character_state,
        })
    }
}
