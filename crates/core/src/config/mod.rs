use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PROJECTS_DIR_ENV: &str = "STORYFORGE_PROJECTS_DIR";
pub const RETRIEVAL_K_ENV: &str = "STORYFORGE_RETRIEVAL_K";

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout() -> u64 {
    600
}

fn default_embedding_timeout() -> u64 {
    60
}

fn default_embedding_retrieval_k() -> u32 {
    4
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("./novels")
}

fn default_vector_store_dir() -> PathBuf {
    PathBuf::from("./vectorstore")
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value `{value}` for {variable}")]
    InvalidOverride {
        variable: &'static str,
        value: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub interface_format: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            interface_format: String::new(),
            model_name: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn is_meaningful(&self) -> bool {
        !(self.api_key.is_empty()
            && self.base_url.is_empty()
            && self.interface_format.is_empty()
            && self.model_name.is_empty())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub interface_format: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_embedding_retrieval_k")]
    pub retrieval_k: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            interface_format: String::new(),
            model_name: String::new(),
            retrieval_k: default_embedding_retrieval_k(),
            timeout: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_meaningful(&self) -> bool {
        !(self.api_key.is_empty()
            && self.base_url.is_empty()
            && self.interface_format.is_empty()
            && self.model_name.is_empty())
    }
}

/// Where projects and knowledge indexes live on disk.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    #[serde(default = "default_vector_store_dir")]
    pub vector_store_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            vector_store_dir: default_vector_store_dir(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub custom_directories: Vec<PathBuf>,
    #[serde(default)]
    pub enable_hot_reload: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecentUsage {
    #[serde(default)]
    pub last_llm_interface: Option<String>,
    #[serde(default)]
    pub last_embedding_interface: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm_profiles: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub embedding_profiles: BTreeMap<String, EmbeddingConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub recent: RecentUsage,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_llm_profile(&self, name: &str) -> Option<&LlmConfig> {
        self.llm_profiles.get(name)
    }

    pub fn upsert_llm_profile<S: Into<String>>(&mut self, name: S, profile: LlmConfig) {
        self.llm_profiles.insert(name.into(), profile);
    }

    pub fn remove_llm_profile(&mut self, name: &str) -> Option<LlmConfig> {
        self.llm_profiles.remove(name)
    }

    pub fn get_embedding_profile(&self, name: &str) -> Option<&EmbeddingConfig> {
        self.embedding_profiles.get(name)
    }

    pub fn upsert_embedding_profile<S: Into<String>>(&mut self, name: S, profile: EmbeddingConfig) {
        self.embedding_profiles.insert(name.into(), profile);
    }

    pub fn remove_embedding_profile(&mut self, name: &str) -> Option<EmbeddingConfig> {
        self.embedding_profiles.remove(name)
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Applies `STORYFORGE_*` overrides. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(PROJECTS_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.storage.projects_dir = PathBuf::from(dir.trim());
        }
        if let Some(raw) = lookup(RETRIEVAL_K_ENV).filter(|v| !v.trim().is_empty()) {
            let k = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|k| *k > 0)
                .ok_or_else(|| ConfigError::InvalidOverride {
                    variable: RETRIEVAL_K_ENV,
                    value: raw.clone(),
                })?;
            for profile in self.embedding_profiles.values_mut() {
                profile.retrieval_k = k;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Config::from_path(&path)?
        } else {
            Config::default()
        };

        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }

    pub fn touch_llm_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_llm_interface = Some(name.into());
    }

    pub fn touch_embedding_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_embedding_interface = Some(name.into());
    }

    pub fn last_llm_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_llm_interface
            .as_deref()
            .filter(|name| self.config.llm_profiles.contains_key(*name))
    }

    pub fn last_embedding_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_embedding_interface
            .as_deref()
            .filter(|name| self.config.embedding_profiles.contains_key(*name))
    }

    /// Points the `recent` entries at existing profiles, picking the first
    /// profile by name when the remembered one is gone.
    pub fn ensure_recent_defaults(&mut self) {
        if self.last_llm_interface().is_none() {
            let next = self.config.llm_profiles.keys().next().cloned();
            self.config.recent.last_llm_interface = next;
        }
        if self.last_embedding_interface().is_none() {
            let next = self.config.embedding_profiles.keys().next().cloned();
            self.config.recent.last_embedding_interface = next;
        }
    }

    /// The profile selected by name, or the most recently used one.
    pub fn llm_profile(&self, name: Option<&str>) -> Option<(&str, &LlmConfig)> {
        let name = name.or_else(|| self.last_llm_interface())?;
        self.config
            .llm_profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn embedding_profile(&self, name: Option<&str>) -> Option<(&str, &EmbeddingConfig)> {
        let name = name.or_else(|| self.last_embedding_interface())?;
        self.config
            .embedding_profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
    }
}
