use crate::blueprint::ChapterBlueprintEntry;
use crate::prompts::PromptArguments;

use super::ChapterDraftRequest;

pub(super) const NO_KNOWLEDGE_PLACEHOLDER: &str = "（无相关知识库内容）";

/// Inputs of `next_chapter_draft` that come from earlier chapters.
pub(super) struct StoryContext {
    pub global_summary: String,
    pub character_state: String,
    pub previous_excerpt: String,
    pub short_summary: String,
    pub filtered_context: String,
}

pub(super) fn insert_entry(args: &mut PromptArguments, entry: &ChapterBlueprintEntry) {
    args.insert("novel_number".into(), entry.chapter_number.to_string());
    args.insert("chapter_title".into(), entry.chapter_title.clone());
    args.insert("chapter_role".into(), entry.chapter_role.clone());
    args.insert("chapter_purpose".into(), entry.chapter_purpose.clone());
    args.insert("suspense_level".into(), entry.suspense_level.clone());
    args.insert("foreshadowing".into(), entry.foreshadowing.clone());
    args.insert("plot_twist_level".into(), entry.plot_twist_level.clone());
    args.insert("chapter_summary".into(), entry.chapter_summary.clone());
}

pub(super) fn insert_next_entry(args: &mut PromptArguments, next: &ChapterBlueprintEntry) {
    args.insert("next_chapter_number".into(), next.chapter_number.to_string());
    args.insert("next_chapter_title".into(), next.chapter_title.clone());
    args.insert("next_chapter_role".into(), next.chapter_role.clone());
    args.insert("next_chapter_purpose".into(), next.chapter_purpose.clone());
    args.insert(
        "next_chapter_suspense_level".into(),
        next.suspense_level.clone(),
    );
    args.insert("next_chapter_foreshadowing".into(), next.foreshadowing.clone());
    args.insert(
        "next_chapter_plot_twist_level".into(),
        next.plot_twist_level.clone(),
    );
    args.insert("next_chapter_summary".into(), next.chapter_summary.clone());
}

fn insert_request(args: &mut PromptArguments, request: &ChapterDraftRequest, word_number: u32) {
    args.insert("word_number".into(), word_number.to_string());
    args.insert(
        "characters_involved".into(),
        request.characters_involved.trim().to_string(),
    );
    args.insert("key_items".into(), request.key_items.trim().to_string());
    args.insert("scene_location".into(), request.scene_location.trim().to_string());
    args.insert("time_constraint".into(), request.time_constraint.trim().to_string());
    args.insert("user_guidance".into(), request.user_guidance.trim().to_string());
}

pub(super) fn first_chapter_arguments(
    entry: &ChapterBlueprintEntry,
    request: &ChapterDraftRequest,
    word_number: u32,
    architecture: &str,
) -> PromptArguments {
    let mut args = PromptArguments::new();
    insert_entry(&mut args, entry);
    insert_request(&mut args, request, word_number);
    args.insert("novel_setting".into(), architecture.trim().to_string());
    args
}

pub(super) fn next_chapter_arguments(
    entry: &ChapterBlueprintEntry,
    next: &ChapterBlueprintEntry,
    request: &ChapterDraftRequest,
    word_number: u32,
    context: StoryContext,
) -> PromptArguments {
    let mut args = PromptArguments::new();
    insert_entry(&mut args, entry);
    insert_next_entry(&mut args, next);
    insert_request(&mut args, request, word_number);
    args.insert("global_summary".into(), context.global_summary);
    args.insert("character_state".into(), context.character_state);
    args.insert("previous_chapter_excerpt".into(), context.previous_excerpt);
    args.insert("short_summary".into(), context.short_summary);
    args.insert("filtered_context".into(), context.filtered_context);
    args
}

pub(super) fn optimize_arguments(
    entry: &ChapterBlueprintEntry,
    architecture: &str,
    previous_excerpt: &str,
    draft: &str,
) -> PromptArguments {
    let mut args = PromptArguments::new();
    insert_entry(&mut args, entry);
    args.insert("novel_setting".into(), architecture.trim().to_string());
    args.insert("previous_chapter_excerpt".into(), previous_excerpt.to_string());
    args.insert("chapter_text".into(), draft.to_string());
    args
}

/// Retrieval query for a chapter: title, summary and the request hints,
/// skipping blanks.
pub(super) fn knowledge_query(entry: &ChapterBlueprintEntry, request: &ChapterDraftRequest) -> String {
    [
        entry.chapter_title.as_str(),
        entry.chapter_summary.as_str(),
        request.characters_involved.as_str(),
        request.key_items.as_str(),
        request.scene_location.as_str(),
    ]
    .iter()
    .map(|part| part.trim())
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}
