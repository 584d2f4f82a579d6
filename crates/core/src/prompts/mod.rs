//! Prompt templates: a built-in TOML catalogue, optionally overridden key by
//! key from TOML or YAML files in custom directories.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;

mod template;

pub use template::PromptTemplate;
use template::RawPrompt;

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

/// Every key the generation services render.
pub const PROMPT_KEYS: &[&str] = &[
    "core_seed",
    "character_dynamics",
    "world_building",
    "plot_architecture",
    "create_character_state",
    "regenerate_character_state",
    "chapter_blueprint",
    "summarize_recent_chapters",
    "first_chapter_system",
    "first_chapter_draft",
    "next_chapter_draft",
    "optimize_chapter",
    "summary",
    "update_character_state",
    "global_summary",
];

pub type PromptArguments = HashMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSource {
    BuiltIn,
    File(PathBuf),
}

impl PromptSource {
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::BuiltIn)
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::BuiltIn => None,
            Self::File(path) => Some(path),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PromptMetadata {
    description: Option<String>,
    source: PromptSource,
}

impl PromptMetadata {
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("missing argument `{argument}` when rendering prompt `{key}`")]
    MissingArgument { key: String, argument: String },
    #[error("failed to read prompt file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse built-in prompt definitions: {0}")]
    ParseBuiltIn(toml::de::Error),
    #[error("failed to parse prompt file `{path}` as TOML: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse prompt file `{path}` as YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error(
        "required key `{argument}` declared for prompt `{key}` but no matching placeholder was found"
    )]
    InvalidRequired { key: String, argument: String },
}

#[derive(Debug, Deserialize)]
struct PromptDocument {
    #[serde(default)]
    prompts: BTreeMap<String, RawPrompt>,
}

#[derive(Debug)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptTemplate>,
    directories: Vec<PathBuf>,
    hot_reload: bool,
}

impl PromptRegistry {
    /// Built-in prompts only.
    pub fn new() -> Result<Self, PromptError> {
        Self::from_prompt_config(&PromptConfig::default())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::with_options(config.custom_directories.clone(), config.enable_hot_reload)
    }

    pub fn with_custom_directories<P: AsRef<Path>>(directories: &[P]) -> Result<Self, PromptError> {
        let dirs = directories
            .iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();
        Self::with_options(dirs, false)
    }

    fn with_options(directories: Vec<PathBuf>, hot_reload: bool) -> Result<Self, PromptError> {
        let mut registry = Self {
            prompts: BTreeMap::new(),
            directories,
            hot_reload,
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn hot_reload_enabled(&self) -> bool {
        self.hot_reload
    }

    pub fn custom_directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Re-reads the built-in catalogue and every custom directory. Later
    /// directories win over earlier ones.
    pub fn reload(&mut self) -> Result<(), PromptError> {
        let mut prompts = BTreeMap::new();
        let document: PromptDocument =
            toml::from_str(BUILT_IN_PROMPTS).map_err(PromptError::ParseBuiltIn)?;
        insert_document(&mut prompts, document, &PromptSource::BuiltIn)?;
        for dir in &self.directories {
            load_directory(dir, &mut prompts)?;
        }
        self.prompts = prompts;
        Ok(())
    }

    /// Reloads only when hot reload is switched on.
    pub fn refresh(&mut self) -> Result<(), PromptError> {
        if self.hot_reload {
            self.reload()?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.prompts.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.prompts.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(String::as_str)
    }

    pub fn format(&self, key: &str, args: &PromptArguments) -> Result<String, PromptError> {
        self.template(key)?.render(args)
    }

    pub fn format_with<I, K, V>(&self, key: &str, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.template(key)?.render_with(arguments)
    }

    fn template(&self, key: &str) -> Result<&PromptTemplate, PromptError> {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))
    }
}

fn insert_document(
    prompts: &mut BTreeMap<String, PromptTemplate>,
    document: PromptDocument,
    source: &PromptSource,
) -> Result<(), PromptError> {
    for (key, raw) in document.prompts {
        let template = PromptTemplate::from_raw(key.clone(), raw, source.clone())?;
        prompts.insert(key, template);
    }
    Ok(())
}

fn load_directory(
    dir: &Path,
    prompts: &mut BTreeMap<String, PromptTemplate>,
) -> Result<(), PromptError> {
    if !dir.is_dir() {
        return Ok(());
    }

    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| PromptError::Io { path, source }
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let document: PromptDocument = match ext.as_deref() {
            Some("toml") => {
                let contents = fs::read_to_string(&path).map_err(io_error(path.as_path()))?;
                toml::from_str(&contents).map_err(|source| PromptError::ParseToml {
                    path: path.clone(),
                    source,
                })?
            }
            Some("yaml" | "yml") => {
                let contents = fs::read_to_string(&path).map_err(io_error(path.as_path()))?;
                serde_yaml::from_str(&contents).map_err(|source| PromptError::ParseYaml {
                    path: path.clone(),
                    source,
                })?
            }
            _ => continue,
        };
        insert_document(prompts, document, &PromptSource::File(path.clone()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn entry_keys() -> Vec<&'static str> {
        vec![
            "novel_number",
            "chapter_title",
            "chapter_role",
            "chapter_purpose",
            "suspense_level",
            "foreshadowing",
            "plot_twist_level",
            "chapter_summary",
        ]
    }

    fn next_entry_keys() -> Vec<&'static str> {
        vec![
            "next_chapter_number",
            "next_chapter_title",
            "next_chapter_role",
            "next_chapter_purpose",
            "next_chapter_suspense_level",
            "next_chapter_foreshadowing",
            "next_chapter_plot_twist_level",
            "next_chapter_summary",
        ]
    }

    fn request_keys() -> Vec<&'static str> {
        vec![
            "word_number",
            "characters_involved",
            "key_items",
            "scene_location",
            "time_constraint",
            "user_guidance",
        ]
    }

    /// Arguments each built-in prompt is rendered with by the services.
    fn supplied_arguments(key: &str) -> Vec<&'static str> {
        let mut args = match key {
            "core_seed" => vec!["topic", "genre", "number_of_chapters", "word_number", "user_guidance"],
            "character_dynamics" | "world_building" => vec!["core_seed", "user_guidance"],
            "plot_architecture" => vec![
                "core_seed",
                "character_dynamics",
                "world_building",
                "user_guidance",
            ],
            "create_character_state" => vec!["character_dynamics"],
            "regenerate_character_state" => vec!["character_dynamics", "user_guidance"],
            "chapter_blueprint" => vec!["novel_architecture", "number_of_chapters", "user_guidance"],
            "summarize_recent_chapters" => {
                let mut args = entry_keys();
                args.extend(next_entry_keys());
                args.push("combined_text");
                args
            }
            "first_chapter_system" => vec![],
            "first_chapter_draft" => {
                let mut args = entry_keys();
                args.extend(request_keys());
                args.push("novel_setting");
                args
            }
            "next_chapter_draft" => {
                let mut args = entry_keys();
                args.extend(next_entry_keys());
                args.extend(request_keys());
                args.extend([
                    "global_summary",
                    "character_state",
                    "previous_chapter_excerpt",
                    "short_summary",
                    "filtered_context",
                ]);
                args
            }
            "optimize_chapter" => {
                let mut args = entry_keys();
                args.extend(["novel_setting", "previous_chapter_excerpt", "chapter_text"]);
                args
            }
            "summary" => vec!["chapter_text", "global_summary"],
            "update_character_state" => vec!["chapter_text", "old_state"],
            "global_summary" => vec!["novel_architecture", "chapter_blueprint", "user_guidance"],
            other => panic!("no argument list for `{other}`"),
        };
        args.sort_unstable();
        args
    }

    #[test]
    fn built_in_catalogue_matches_service_arguments() {
        let registry = PromptRegistry::new().unwrap();
        for key in PROMPT_KEYS {
            let template = registry.get(key).unwrap_or_else(|| panic!("missing `{key}`"));
            assert!(template.metadata().source().is_builtin());
            let placeholders: BTreeSet<&str> = template.placeholders().collect();
            let supplied: BTreeSet<&str> = supplied_arguments(key).into_iter().collect();
            assert!(
                placeholders.is_subset(&supplied),
                "`{key}` uses {:?}",
                placeholders.difference(&supplied).collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn recent_chapter_summary_prompt_names_its_output_marker() {
        let registry = PromptRegistry::new().unwrap();
        let args: PromptArguments = supplied_arguments("summarize_recent_chapters")
            .into_iter()
            .map(|key| (key.to_string(), format!("<{key}>")))
            .collect();
        let output = registry.format("summarize_recent_chapters", &args).unwrap();
        assert!(output.contains("当前章节摘要"));
        assert!(output.contains("前三章内容"));
        assert!(output.contains("<combined_text>"));
    }

    #[test]
    fn missing_argument_fails() {
        let registry = PromptRegistry::new().unwrap();
        let template = registry.get("core_seed").unwrap();
        let args = PromptArguments::from([("topic".into(), "星际殖民".into())]);
        match template.render(&args).unwrap_err() {
            PromptError::MissingArgument { key, .. } => assert_eq!(key, "core_seed"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            registry.format_with("no_such_prompt", PromptArguments::new()),
            Err(PromptError::NotFound(_))
        ));
    }

    #[test]
    fn custom_directories_override_by_key() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.toml"),
            "[prompts.core_seed]\ntemplate = \"定制 {topic}\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.yaml"),
            "prompts:\n  summary:\n    text: \"精简 {chapter_text}\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = PromptRegistry::with_custom_directories(&[dir.path()]).unwrap();
        let seed = registry.format_with("core_seed", [("topic", "悬疑")]).unwrap();
        assert_eq!(seed, "定制 悬疑");
        let summary = registry
            .get("summary")
            .unwrap()
            .render_with([("chapter_text", "第一章")])
            .unwrap();
        assert_eq!(summary, "精简 第一章");
        assert!(registry.get("world_building").unwrap().metadata().source().is_builtin());
    }

    #[test]
    fn refresh_only_reloads_with_hot_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[prompts.summary]\ntemplate = \"初始 {chapter_text}\"\n").unwrap();

        let config = PromptConfig {
            custom_directories: vec![dir.path().into()],
            enable_hot_reload: false,
        };
        let mut frozen = PromptRegistry::from_prompt_config(&config).unwrap();
        let mut live = PromptRegistry::from_prompt_config(&PromptConfig {
            enable_hot_reload: true,
            ..config
        })
        .unwrap();

        fs::write(&path, "[prompts.summary]\ntemplate = \"更新 {chapter_text}\"\n").unwrap();
        frozen.refresh().unwrap();
        live.refresh().unwrap();

        let render = |registry: &PromptRegistry| {
            registry
                .format_with("summary", [("chapter_text", "第二章")])
                .unwrap()
        };
        assert_eq!(render(&frozen), "初始 第二章");
        assert_eq!(render(&live), "更新 第二章");
    }

    #[test]
    fn broken_custom_file_reports_its_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[prompts.summary\n").unwrap();
        match PromptRegistry::with_custom_directories(&[dir.path()]).unwrap_err() {
            PromptError::ParseToml { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
