use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::generation::{invoke_cleaned, LanguageModel, LanguageModelError, ModelCall};
use crate::knowledge::{ingest, DocumentMetadata, DocumentType, KnowledgeBase};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::project::{ArtifactSlot, Project, ProjectError, ProjectStatus, ProjectStore};
use crate::prompts::{PromptError, PromptRegistry};

#[derive(Debug, Error)]
pub enum ArchitectureError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error("序列化架构中间结果失败: {0}")]
    SerializePartial(#[source] serde_json::Error),
    #[error("渲染阶段 {stage} 的提示词失败: {source}")]
    Prompt {
        stage: ArchitectureStage,
        #[source]
        source: PromptError,
    },
    #[error("阶段 {stage} 调用 LLM 失败: {source}")]
    Model {
        stage: ArchitectureStage,
        #[source]
        source: LanguageModelError,
    },
    #[error("阶段 {stage} 返回内容为空")]
    EmptyResponse { stage: ArchitectureStage },
}

impl ArchitectureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Project(err) => err.kind(),
            Self::SerializePartial(_) => ErrorKind::StorageFailure,
            Self::Prompt { .. } | Self::Model { .. } | Self::EmptyResponse { .. } => {
                ErrorKind::GenerationFailure
            }
        }
    }

    pub fn stage(&self) -> Option<ArchitectureStage> {
        match self {
            Self::Prompt { stage, .. } | Self::Model { stage, .. } | Self::EmptyResponse { stage } => {
                Some(*stage)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ArchitectureStage {
    CoreSeed,
    CharacterDynamics,
    WorldBuilding,
    PlotArchitecture,
    /// Follow-up call after the four sections exist; never checkpointed.
    CharacterState,
}

impl ArchitectureStage {
    /// The checkpointed stages, in execution order.
    pub const PIPELINE: [ArchitectureStage; 4] = [
        Self::CoreSeed,
        Self::CharacterDynamics,
        Self::WorldBuilding,
        Self::PlotArchitecture,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::CoreSeed => "核心种子",
            Self::CharacterDynamics => "角色动力学",
            Self::WorldBuilding => "世界观",
            Self::PlotArchitecture => "三幕式情节",
            Self::CharacterState => "角色状态",
        }
    }

    fn prompt_key(&self) -> &'static str {
        match self {
            Self::CoreSeed => "core_seed",
            Self::CharacterDynamics => "character_dynamics",
            Self::WorldBuilding => "world_building",
            Self::PlotArchitecture => "plot_architecture",
            Self::CharacterState => "create_character_state",
        }
    }
}

impl fmt::Display for ArchitectureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Checkpoint of the staged architecture build.
///
/// A stage whose field is set is never regenerated while the checkpoint
/// exists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchitectureState {
    #[serde(default, alias = "core_seed_result", skip_serializing_if = "Option::is_none")]
    pub core_seed: Option<String>,
    #[serde(
        default,
        alias = "character_dynamics_result",
        skip_serializing_if = "Option::is_none"
    )]
    pub character_dynamics: Option<String>,
    #[serde(
        default,
        alias = "world_building_result",
        skip_serializing_if = "Option::is_none"
    )]
    pub world_building: Option<String>,
    #[serde(default, alias = "plot_arch_result", skip_serializing_if = "Option::is_none")]
    pub plot_architecture: Option<String>,
}

impl ArchitectureState {
    pub fn get(&self, stage: ArchitectureStage) -> Option<&str> {
        match stage {
            ArchitectureStage::CoreSeed => self.core_seed.as_deref(),
            ArchitectureStage::CharacterDynamics => self.character_dynamics.as_deref(),
            ArchitectureStage::WorldBuilding => self.world_building.as_deref(),
            ArchitectureStage::PlotArchitecture => self.plot_architecture.as_deref(),
            ArchitectureStage::CharacterState => None,
        }
    }

    fn set(&mut self, stage: ArchitectureStage, value: String) {
        let value = Some(value);
        match stage {
            ArchitectureStage::CoreSeed => self.core_seed = value,
            ArchitectureStage::CharacterDynamics => self.character_dynamics = value,
            ArchitectureStage::WorldBuilding => self.world_building = value,
            ArchitectureStage::PlotArchitecture => self.plot_architecture = value,
            ArchitectureStage::CharacterState => {}
        }
    }

    fn section(&self, stage: ArchitectureStage) -> &str {
        self.get(stage).map(str::trim).unwrap_or_default()
    }

    pub fn is_complete(&self) -> bool {
        ArchitectureStage::PIPELINE
            .iter()
            .all(|stage| self.get(*stage).is_some())
    }
}

/// Renders the final architecture document from a complete checkpoint.
pub fn render_architecture(project: &Project, state: &ArchitectureState) -> String {
    format!(
        "#=== 0) 小说设定 ===\n主题：{},类型：{},篇幅：约{}章（每章{}字）\n\n\
         #=== 1) 核心种子 ===\n{}\n\n\
         #=== 2) 角色动力学 ===\n{}\n\n\
         #=== 3) 世界观 ===\n{}\n\n\
         #=== 4) 三幕式情节架构 ===\n{}\n",
        project.topic,
        project.genre,
        project.chapter_count,
        project.target_words_per_chapter,
        state.section(ArchitectureStage::CoreSeed),
        state.section(ArchitectureStage::CharacterDynamics),
        state.section(ArchitectureStage::WorldBuilding),
        state.section(ArchitectureStage::PlotArchitecture),
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchitectureOutcome {
    pub architecture: String,
    pub character_state: String,
}

pub struct ArchitectureService<'a> {
    store: &'a ProjectStore,
    prompts: &'a PromptRegistry,
    knowledge: &'a dyn KnowledgeBase,
    sink: &'a dyn LogSink,
    max_retries: usize,
}

impl<'a> ArchitectureService<'a> {
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

    /// Runs every missing stage, writes the final architecture and the
    /// initial character state. Completed stages survive a failure and are
    /// skipped on the next call.
    pub fn generate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        user_guidance: &str,
    ) -> Result<ArchitectureOutcome, ArchitectureError> {
        self.store
            .exclusive(project_id, || self.generate_locked(model, project_id, user_guidance))
    }

    /// The checkpoint as currently persisted; empty when none exists or it
    /// cannot be parsed.
    pub fn load_state(&self, project_id: &str) -> Result<ArchitectureState, ArchitectureError> {
        let Some(text) = self
            .store
            .read_slot(project_id, ArtifactSlot::ArchitecturePartial)?
        else {
            return Ok(ArchitectureState::default());
        };
        match serde_json::from_str(&text) {
            Ok(state) => Ok(state),
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    format!("无法解析架构中间结果，将从空状态开始：{err}"),
                );
                Ok(ArchitectureState::default())
            }
        }
    }

    fn generate_locked<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project_id: &str,
        user_guidance: &str,
    ) -> Result<ArchitectureOutcome, ArchitectureError> {
        let project = self.store.get(project_id)?;
        let mut state = self.load_state(project_id)?;

        for stage in ArchitectureStage::PIPELINE {
            self.run_stage(model, &project, user_guidance, &mut state, stage)?;
        }

        let architecture = render_architecture(&project, &state);
        self.store
            .write_slot(project_id, ArtifactSlot::ArchitectureFinal, &architecture)?;
        self.log(LogLevel::Info, "小说架构已写入");

        let character_state = self.create_character_state(model, &state)?;
        self.store
            .write_slot(project_id, ArtifactSlot::CharacterState, &character_state)?;

        self.store
            .remove_slot(project_id, ArtifactSlot::ArchitecturePartial)?;
        self.store
            .advance_status(project_id, ProjectStatus::ArchitectureGenerated)?;
        ingest(
            self.knowledge,
            self.sink,
            &architecture,
            DocumentMetadata::new(DocumentType::Architecture, project_id),
        );

        Ok(ArchitectureOutcome {
            architecture,
            character_state,
        })
    }

    fn run_stage<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        project: &Project,
        user_guidance: &str,
        state: &mut ArchitectureState,
        stage: ArchitectureStage,
    ) -> Result<(), ArchitectureError> {
        if state.get(stage).is_some() {
            self.log(LogLevel::Info, format!("{stage}已完成，跳过"));
            return Ok(());
        }

        self.log(LogLevel::Info, format!("开始生成{stage}..."));
        let guidance = user_guidance.trim().to_string();
        let arguments: Vec<(&str, String)> = match stage {
            ArchitectureStage::CoreSeed => vec![
                ("topic", project.topic.clone()),
                ("genre", project.genre.clone()),
                ("number_of_chapters", project.chapter_count.to_string()),
                ("word_number", project.target_words_per_chapter.to_string()),
                ("user_guidance", guidance),
            ],
            ArchitectureStage::CharacterDynamics | ArchitectureStage::WorldBuilding => vec![
                ("core_seed", state.section(ArchitectureStage::CoreSeed).to_string()),
                ("user_guidance", guidance),
            ],
            ArchitectureStage::PlotArchitecture => vec![
                ("core_seed", state.section(ArchitectureStage::CoreSeed).to_string()),
                (
                    "character_dynamics",
                    state.section(ArchitectureStage::CharacterDynamics).to_string(),
                ),
                (
                    "world_building",
                    state.section(ArchitectureStage::WorldBuilding).to_string(),
                ),
                ("user_guidance", guidance),
            ],
            ArchitectureStage::CharacterState => Vec::new(),
        };

        let result = self.invoke_stage(model, stage, arguments)?;
        state.set(stage, result);
        self.save_state(&project.id, state)
    }

    fn create_character_state<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        state: &ArchitectureState,
    ) -> Result<String, ArchitectureError> {
        self.log(LogLevel::Info, "根据角色动力学生成初始角色状态...");
        self.invoke_stage(
            model,
            ArchitectureStage::CharacterState,
            vec![(
                "character_dynamics",
                state.section(ArchitectureStage::CharacterDynamics).to_string(),
            )],
        )
    }

    fn invoke_stage<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        stage: ArchitectureStage,
        arguments: Vec<(&str, String)>,
    ) -> Result<String, ArchitectureError> {
        let prompt = self
            .prompts
            .format_with(stage.prompt_key(), arguments)
            .map_err(|source| ArchitectureError::Prompt { stage, source })?;
        let result = invoke_cleaned(
            model,
            self.sink,
            ModelCall {
                label: stage.label(),
                prompt: &prompt,
                system_message: None,
                max_attempts: self.max_retries,
            },
        )
        .map_err(|source| ArchitectureError::Model { stage, source })?;
        if result.is_empty() {
            self.log(
                LogLevel::Warn,
                format!("{stage}生成失败，模型返回内容为空，已完成的阶段已保留"),
            );
            return Err(ArchitectureError::EmptyResponse { stage });
        }
        Ok(result)
    }

    fn save_state(&self, project_id: &str, state: &ArchitectureState) -> Result<(), ArchitectureError> {
        let json = serde_json::to_string_pretty(state).map_err(ArchitectureError::SerializePartial)?;
        self.store
            .write_slot(project_id, ArtifactSlot::ArchitecturePartial, &json)?;
        Ok(())
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, MockLanguageModel};

    fn service(fx: &Fixture) -> ArchitectureService<'_> {
        ArchitectureService::new(&fx.store, &fx.prompts, &fx.knowledge, fx.sink.as_ref())
            .with_max_retries(1)
    }

    #[test]
    fn builds_all_sections_then_character_state() {
        let fx = Fixture::new();
        let project = fx.project(10);
        let model = MockLanguageModel::new(vec!["种子", "角色", "世界", "情节", "状态"]);

        let outcome = service(&fx).generate(&model, &project.id, "多写伏笔").unwrap();

        assert_eq!(
            outcome.architecture,
            "#=== 0) 小说设定 ===\n主题：失落文明的回声,类型：科幻,篇幅：约10章（每章2500字）\n\n\
             #=== 1) 核心种子 ===\n种子\n\n#=== 2) 角色动力学 ===\n角色\n\n\
             #=== 3) 世界观 ===\n世界\n\n#=== 4) 三幕式情节架构 ===\n情节\n"
        );
        assert_eq!(outcome.character_state, "状态");
        assert_eq!(model.calls(), 5);

        let prompts = model.prompts();
        assert!(prompts[3].contains("种子") && prompts[3].contains("角色") && prompts[3].contains("世界"));
        assert!(prompts[4].contains("角色"));

        assert_eq!(
            fx.store.read_slot(&project.id, ArtifactSlot::ArchitecturePartial).unwrap(),
            None
        );
        assert_eq!(
            fx.store.get(&project.id).unwrap().status,
            ProjectStatus::ArchitectureGenerated
        );
        assert!(fx.knowledge.exists(&project.id));
    }

    #[test]
    fn failure_keeps_checkpoint_and_rerun_resumes() {
        let fx = Fixture::new();
        let project = fx.project(3);
        let svc = service(&fx);

        let failing = MockLanguageModel::new(vec!["种子", "角色"]);
        let err = svc.generate(&failing, &project.id, "").unwrap_err();
        assert_eq!(err.stage(), Some(ArchitectureStage::WorldBuilding));
        assert_eq!(err.kind(), ErrorKind::GenerationFailure);

        let state = svc.load_state(&project.id).unwrap();
        assert_eq!(state.core_seed.as_deref(), Some("种子"));
        assert_eq!(state.character_dynamics.as_deref(), Some("角色"));
        assert!(state.world_building.is_none());

        let resumed = MockLanguageModel::new(vec!["世界", "情节", "状态"]);
        let outcome = svc.generate(&resumed, &project.id, "").unwrap();
        assert_eq!(resumed.calls(), 3);
        assert!(outcome.architecture.contains("#=== 1) 核心种子 ===\n种子"));
    }

    #[test]
    fn blank_stage_result_is_an_empty_response() {
        let fx = Fixture::new();
        let project = fx.project(3);
        let model = MockLanguageModel::new(vec!["种子", "  "]);

        let err = service(&fx).generate(&model, &project.id, "").unwrap_err();
        assert!(matches!(
            err,
            ArchitectureError::EmptyResponse {
                stage: ArchitectureStage::CharacterDynamics
            }
        ));
        let raw = fx
            .store
            .read_slot(&project.id, ArtifactSlot::ArchitecturePartial)
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["coreSeed"], "种子");
        assert!(value.get("characterDynamics").is_none());
    }

    #[test]
    fn reads_checkpoints_written_with_legacy_keys() {
        let state: ArchitectureState =
            serde_json::from_str(r#"{"core_seed_result": "旧种子", "plot_arch_result": "旧情节"}"#)
                .unwrap();
        assert_eq!(state.core_seed.as_deref(), Some("旧种子"));
        assert_eq!(state.plot_architecture.as_deref(), Some("旧情节"));
        assert!(!state.is_complete());
    }
}
