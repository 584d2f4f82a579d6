use crate::knowledge::KnowledgeBase;
use crate::logging::{LogLevel, LogRecord, LogSink};

use super::{ArtifactSlot, NewProject, Project, ProjectError, ProjectStore};

/// Project lifecycle operations plus read access to the running artifacts.
pub struct ProjectService<'a> {
    store: &'a ProjectStore,
    knowledge: &'a dyn KnowledgeBase,
    sink: &'a dyn LogSink,
}

impl<'a> ProjectService<'a> {
    pub fn new(
        store: &'a ProjectStore,
        knowledge: &'a dyn KnowledgeBase,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            store,
            knowledge,
            sink,
        }
    }

    pub fn create(&self, new_project: &NewProject) -> Result<Project, ProjectError> {
        let project = self.store.insert(new_project)?;
        self.log(
            LogLevel::Info,
            format!("已创建项目《{}》（{}）", project.title, project.id),
        );
        if let Err(err) = self.knowledge.create_index(&project.id) {
            self.log(
                LogLevel::Warn,
                format!("初始化知识库失败，将在首次写入时创建：{err}"),
            );
        }
        Ok(project)
    }

    pub fn get(&self, project_id: &str) -> Result<Project, ProjectError> {
        self.store.get(project_id)
    }

    pub fn list(&self) -> Result<Vec<Project>, ProjectError> {
        self.store.list()
    }

    /// Removes the project directory and its knowledge index. Returns `false`
    /// when no such project existed.
    pub fn delete(&self, project_id: &str) -> Result<bool, ProjectError> {
        self.store.exclusive(project_id, || {
            let removed = self.store.remove_project_dir(project_id)?;
            match self.knowledge.delete_index(project_id) {
                Ok(true) => self.log(LogLevel::Info, format!("已删除知识库：{project_id}")),
                Ok(false) => {}
                Err(err) => self.log(
                    LogLevel::Warn,
                    format!("删除知识库失败（{project_id}）：{err}"),
                ),
            }
            if removed {
                self.log(LogLevel::Info, format!("已删除项目：{project_id}"));
            }
            Ok(removed)
        })
    }

    pub fn architecture(&self, project_id: &str) -> Result<String, ProjectError> {
        self.read_existing(project_id, ArtifactSlot::ArchitectureFinal)
    }

    pub fn blueprint(&self, project_id: &str) -> Result<String, ProjectError> {
        self.read_existing(project_id, ArtifactSlot::Blueprint)
    }

    pub fn character_state(&self, project_id: &str) -> Result<String, ProjectError> {
        self.read_existing(project_id, ArtifactSlot::CharacterState)
    }

    pub fn global_summary(&self, project_id: &str) -> Result<String, ProjectError> {
        self.read_existing(project_id, ArtifactSlot::GlobalSummary)
    }

    fn read_existing(&self, project_id: &str, slot: ArtifactSlot) -> Result<String, ProjectError> {
        if !self.store.exists(project_id) {
            return Err(ProjectError::NotFound(project_id.to_string()));
        }
        self.store.read_slot_or_empty(project_id, slot)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}
