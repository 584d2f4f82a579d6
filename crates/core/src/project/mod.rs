//! Project metadata and the per-project artifact slots persisted on disk.
//!
//! Every project owns one directory under the store root:
//!
//! ```text
//! <root>/<id>/info.json
//! <root>/<id>/partial_architecture.json
//! <root>/<id>/Novel_architecture.txt
//! <root>/<id>/Novel_directory.txt
//! <root>/<id>/character_state.txt
//! <root>/<id>/global_summary.txt
//! <root>/<id>/chapters/chapter_N.txt
//! <root>/<id>/chapters/outline_N.txt
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::fsio::{read_optional, remove_if_exists, write_atomic};

mod locks;
mod service;
mod slot;

pub use locks::KeyedLocks;
pub use service::ProjectService;
pub use slot::{
    ArtifactSlot, ARCHITECTURE_FILE_NAME, BLUEPRINT_FILE_NAME, CHAPTERS_DIR_NAME,
    CHARACTER_STATE_FILE_NAME, GLOBAL_SUMMARY_FILE_NAME, INFO_FILE_NAME, PARTIAL_FILE_NAME,
};

use slot::parse_draft_file_name;

/// Lifecycle marker. Ordered; a project only ever moves forward.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Created,
    ArchitectureGenerated,
    BlueprintGenerated,
}

impl ProjectStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "已创建",
            Self::ArchitectureGenerated => "架构已生成",
            Self::BlueprintGenerated => "目录已生成",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    pub genre: String,
    pub topic: String,
    #[serde(rename = "numChapters")]
    pub chapter_count: u32,
    #[serde(rename = "wordNumber")]
    pub target_words_per_chapter: u32,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User-supplied fields for a new project.
#[derive(Clone, Debug, Default)]
pub struct NewProject {
    pub title: String,
    pub genre: String,
    pub topic: String,
    pub chapter_count: u32,
    pub target_words_per_chapter: u32,
}

impl NewProject {
    fn validate(&self) -> Result<(), ProjectError> {
        for (field, value) in [
            ("title", &self.title),
            ("genre", &self.genre),
            ("topic", &self.topic),
        ] {
            if value.trim().is_empty() {
                return Err(ProjectError::InvalidField {
                    field,
                    reason: "must not be empty",
                });
            }
        }
        if self.chapter_count == 0 {
            return Err(ProjectError::InvalidField {
                field: "chapter_count",
                reason: "must be at least 1",
            });
        }
        if self.target_words_per_chapter == 0 {
            return Err(ProjectError::InvalidField {
                field: "target_words_per_chapter",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("项目 `{0}` 不存在")]
    NotFound(String),
    #[error("非法的项目 ID `{0}`")]
    InvalidId(String),
    #[error("字段 `{field}` 无效：{reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("读取 `{path}` 失败: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("写入 `{path}` 失败: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("删除 `{path}` 失败: {source}")]
    Remove { path: PathBuf, source: io::Error },
    #[error("解析 `{path}` 失败: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("序列化 `{path}` 失败: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl ProjectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::PrerequisiteMissing,
            _ => ErrorKind::StorageFailure,
        }
    }
}

/// File-backed store of projects and their artifact slots.
///
/// Slot writes replace the whole file atomically. Mutating service operations
/// wrap their work in [`ProjectStore::exclusive`] so that writes to one
/// project never interleave.
#[derive(Debug)]
pub struct ProjectStore {
    root: PathBuf,
    locks: KeyedLocks,
}

impl ProjectStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs `f` while holding the write lock for `project_id`.
    pub fn exclusive<R>(&self, project_id: &str, f: impl FnOnce() -> R) -> R {
        self.locks.with_lock(project_id, f)
    }

    pub fn project_dir(&self, project_id: &str) -> Result<PathBuf, ProjectError> {
        validate_id(project_id)?;
        Ok(self.root.join(project_id))
    }

    pub fn slot_path(&self, project_id: &str, slot: ArtifactSlot) -> Result<PathBuf, ProjectError> {
        Ok(self.project_dir(project_id)?.join(slot.relative_path()))
    }

    pub fn exists(&self, project_id: &str) -> bool {
        self.slot_path(project_id, ArtifactSlot::Info)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    pub(crate) fn insert(&self, new_project: &NewProject) -> Result<Project, ProjectError> {
        new_project.validate()?;
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            title: new_project.title.trim().to_string(),
            genre: new_project.genre.trim().to_string(),
            topic: new_project.topic.trim().to_string(),
            chapter_count: new_project.chapter_count,
            target_words_per_chapter: new_project.target_words_per_chapter,
            status: ProjectStatus::Created,
            created_at: now,
            updated_at: now,
        };

        let chapters_dir = self.project_dir(&project.id)?.join(CHAPTERS_DIR_NAME);
        fs::create_dir_all(&chapters_dir).map_err(|source| ProjectError::Write {
            path: chapters_dir.clone(),
            source,
        })?;
        self.save(&project)?;
        Ok(project)
    }

    pub fn get(&self, project_id: &str) -> Result<Project, ProjectError> {
        let path = self.slot_path(project_id, ArtifactSlot::Info)?;
        let text = read_optional(&path)
            .map_err(|source| ProjectError::Read {
                path: path.clone(),
                source,
            })?
            .ok_or_else(|| ProjectError::NotFound(project_id.to_string()))?;
        serde_json::from_str(&text).map_err(|source| ProjectError::Parse { path, source })
    }

    /// All readable projects, newest first. Directories without a parsable
    /// `info.json` are skipped.
    pub fn list(&self) -> Result<Vec<Project>, ProjectError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ProjectError::Read {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut projects = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ProjectError::Read {
                path: self.root.clone(),
                source,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_id(&name).is_err() {
                continue;
            }
            match self.get(&name) {
                Ok(project) => projects.push(project),
                Err(ProjectError::NotFound(_)) | Err(ProjectError::Parse { .. }) => continue,
                Err(other) => return Err(other),
            }
        }

        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    pub(crate) fn save(&self, project: &Project) -> Result<(), ProjectError> {
        let path = self.slot_path(&project.id, ArtifactSlot::Info)?;
        let json = serde_json::to_vec_pretty(project).map_err(|source| {
            ProjectError::Serialize {
                path: path.clone(),
                source,
            }
        })?;
        write_atomic(&path, &json).map_err(|source| ProjectError::Write { path, source })
    }

    /// Moves the project to `status` if that is a step forward. Returns the
    /// stored project either way.
    pub(crate) fn advance_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
    ) -> Result<Project, ProjectError> {
        let mut project = self.get(project_id)?;
        if status > project.status {
            project.status = status;
            project.updated_at = Utc::now();
            self.save(&project)?;
        }
        Ok(project)
    }

    pub(crate) fn touch(&self, project_id: &str) -> Result<(), ProjectError> {
        let mut project = self.get(project_id)?;
        project.updated_at = Utc::now();
        self.save(&project)
    }

    pub(crate) fn remove_project_dir(&self, project_id: &str) -> Result<bool, ProjectError> {
        let dir = self.project_dir(project_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ProjectError::Remove { path: dir, source }),
        }
    }

    pub fn read_slot(
        &self,
        project_id: &str,
        slot: ArtifactSlot,
    ) -> Result<Option<String>, ProjectError> {
        let path = self.slot_path(project_id, slot)?;
        read_optional(&path).map_err(|source| ProjectError::Read { path, source })
    }

    /// Slot content, or an empty string when the slot has never been written.
    pub fn read_slot_or_empty(
        &self,
        project_id: &str,
        slot: ArtifactSlot,
    ) -> Result<String, ProjectError> {
        Ok(self.read_slot(project_id, slot)?.unwrap_or_default())
    }

    pub(crate) fn write_slot(
        &self,
        project_id: &str,
        slot: ArtifactSlot,
        content: &str,
    ) -> Result<(), ProjectError> {
        let path = self.slot_path(project_id, slot)?;
        write_atomic(&path, content.as_bytes()).map_err(|source| ProjectError::Write { path, source })
    }

    pub(crate) fn remove_slot(
        &self,
        project_id: &str,
        slot: ArtifactSlot,
    ) -> Result<bool, ProjectError> {
        let path = self.slot_path(project_id, slot)?;
        remove_if_exists(&path).map_err(|source| ProjectError::Remove { path, source })
    }

    /// Chapter numbers that currently have a stored draft, ascending.
    pub fn stored_chapter_numbers(&self, project_id: &str) -> Result<Vec<u32>, ProjectError> {
        let dir = self.project_dir(project_id)?.join(CHAPTERS_DIR_NAME);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(ProjectError::Read { path: dir, source }),
        };

        let mut numbers: Vec<u32> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str().and_then(parse_draft_file_name))
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }
}

pub(crate) fn validate_id(project_id: &str) -> Result<(), ProjectError> {
    let valid = !project_id.is_empty()
        && project_id.len() <= 64
        && project_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(ProjectError::InvalidId(project_id.to_string()))
    }
}
