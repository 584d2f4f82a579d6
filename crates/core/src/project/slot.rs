use std::fmt;
use std::path::PathBuf;

pub const INFO_FILE_NAME: &str = "info.json";
pub const PARTIAL_FILE_NAME: &str = "partial_architecture.json";
pub const ARCHITECTURE_FILE_NAME: &str = "Novel_architecture.txt";
pub const BLUEPRINT_FILE_NAME: &str = "Novel_directory.txt";
pub const CHARACTER_STATE_FILE_NAME: &str = "character_state.txt";
pub const GLOBAL_SUMMARY_FILE_NAME: &str = "global_summary.txt";
pub const CHAPTERS_DIR_NAME: &str = "chapters";

/// Named artifact owned by a project. Each slot maps to exactly one file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ArtifactSlot {
    Info,
    ArchitecturePartial,
    ArchitectureFinal,
    Blueprint,
    CharacterState,
    GlobalSummary,
    ChapterDraft(u32),
    ChapterOutline(u32),
}

impl ArtifactSlot {
    pub fn relative_path(&self) -> PathBuf {
        match self {
            Self::Info => PathBuf::from(INFO_FILE_NAME),
            Self::ArchitecturePartial => PathBuf::from(PARTIAL_FILE_NAME),
            Self::ArchitectureFinal => PathBuf::from(ARCHITECTURE_FILE_NAME),
            Self::Blueprint => PathBuf::from(BLUEPRINT_FILE_NAME),
            Self::CharacterState => PathBuf::from(CHARACTER_STATE_FILE_NAME),
            Self::GlobalSummary => PathBuf::from(GLOBAL_SUMMARY_FILE_NAME),
            Self::ChapterDraft(number) => {
                PathBuf::from(CHAPTERS_DIR_NAME).join(format!("chapter_{number}.txt"))
            }
            Self::ChapterOutline(number) => {
                PathBuf::from(CHAPTERS_DIR_NAME).join(format!("outline_{number}.txt"))
            }
        }
    }
}

impl fmt::Display for ArtifactSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => f.write_str("info"),
            Self::ArchitecturePartial => f.write_str("architecturePartial"),
            Self::ArchitectureFinal => f.write_str("architectureFinal"),
            Self::Blueprint => f.write_str("blueprint"),
            Self::CharacterState => f.write_str("characterState"),
            Self::GlobalSummary => f.write_str("globalSummary"),
            Self::ChapterDraft(number) => write!(f, "chapter[{number}].draft"),
            Self::ChapterOutline(number) => write!(f, "chapter[{number}].outline"),
        }
    }
}

/// Extracts `N` from a `chapter_N.txt` file name.
pub(crate) fn parse_draft_file_name(name: &str) -> Option<u32> {
    name.strip_prefix("chapter_")?
        .strip_suffix(".txt")?
        .parse()
        .ok()
}
