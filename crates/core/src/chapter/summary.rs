use std::sync::OnceLock;

use regex::Regex;

use crate::project::{ArtifactSlot, ProjectError, ProjectStore};

pub(super) const RECENT_CHAPTER_WINDOW: u32 = 3;
pub(super) const PREVIOUS_EXCERPT_CHARS: usize = 800;
const COMBINED_TAIL_CHARS: usize = 4000;
const SHORT_SUMMARY_MAX_CHARS: usize = 2000;

/// Non-empty texts of the chapters just before the current one, oldest first.
#[derive(Debug, Default)]
pub(super) struct RecentChapters {
    texts: Vec<String>,
}

impl RecentChapters {
    pub fn load(store: &ProjectStore, project_id: &str, current: u32) -> Result<Self, ProjectError> {
        let start = current.saturating_sub(RECENT_CHAPTER_WINDOW).max(1);
        let mut texts = Vec::new();
        for number in start..current {
            let text = store.read_slot_or_empty(project_id, ArtifactSlot::ChapterDraft(number))?;
            if !text.trim().is_empty() {
                texts.push(text);
            }
        }
        Ok(Self { texts })
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Trailing characters of the most recent chapter with content.
    pub fn previous_excerpt(&self) -> String {
        self.texts
            .last()
            .map(|text| tail_chars(text, PREVIOUS_EXCERPT_CHARS).to_string())
            .unwrap_or_default()
    }

    pub fn combined(&self) -> String {
        tail_chars(&self.texts.join("\n\n"), COMBINED_TAIL_CHARS).to_string()
    }
}

/// Pulls the short summary out of a `summarize_recent_chapters` answer.
pub(super) fn extract_summary(response: &str) -> String {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    static BLANK_LINE: OnceLock<Regex> = OnceLock::new();
    let marker =
        MARKER.get_or_init(|| Regex::new(r"当前章节摘要\s*[:：]").expect("invalid summary marker"));
    let blank_line =
        BLANK_LINE.get_or_init(|| Regex::new(r"\n[ \t]*\n").expect("invalid blank line regex"));

    let trimmed = response.trim();
    let extracted = marker
        .find(trimmed)
        .map(|found| {
            let rest = &trimmed[found.end()..];
            let end = blank_line.find(rest).map_or(rest.len(), |m| m.start());
            rest[..end].trim()
        })
        .filter(|text| !text.is_empty())
        .unwrap_or(trimmed);
    truncate_chars(extracted, SHORT_SUMMARY_MAX_CHARS).to_string()
}

pub(crate) fn tail_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_summary_after_marker_up_to_blank_line() {
        let response = "分析……\n当前章节摘要：林远进入秘境，\n发现石碑。\n\n其他说明";
        assert_eq!(extract_summary(response), "林远进入秘境，\n发现石碑。");
        assert_eq!(extract_summary("当前章节摘要: 简短"), "简短");
    }

    #[test]
    fn falls_back_to_whole_response_and_clips() {
        assert_eq!(extract_summary("  纯文本摘要 \n"), "纯文本摘要");
        let long = "长".repeat(2500);
        assert_eq!(extract_summary(&long).chars().count(), 2000);
    }

    #[test]
    fn char_helpers_respect_multibyte_text() {
        assert_eq!(tail_chars("第一章结尾", 2), "结尾");
        assert_eq!(tail_chars("短", 10), "短");
        assert_eq!(truncate_chars("第一章结尾", 3), "第一章");
        assert_eq!(truncate_chars("短", 10), "短");
    }
}
