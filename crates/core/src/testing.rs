//! Shared doubles for the unit tests of the generation services.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::embedding::{EmbeddingModel, EmbeddingModelError};
use crate::generation::{LanguageModel, LanguageModelError};
use crate::knowledge::KnowledgeIndex;
use crate::logging::VecLogSink;
use crate::project::{NewProject, Project, ProjectStore};
use crate::prompts::PromptRegistry;

pub(crate) struct MockLanguageModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    systems: Mutex<Vec<Option<String>>>,
}

impl MockLanguageModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| s.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            systems: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn systems(&self) -> Vec<Option<String>> {
        self.systems.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl LanguageModel for MockLanguageModel {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        self.invoke_with_system(prompt, None)
    }

    fn invoke_with_system(
        &self,
        prompt: &str,
        system_message: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.systems
            .lock()
            .unwrap()
            .push(system_message.map(str::to_string));
        self.responses.lock().unwrap().pop_front().ok_or_else(|| {
            LanguageModelError::new(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no more mock responses",
            ))
        })
    }
}

/// Deterministic embedding: character counts folded into a fixed dimension.
pub(crate) struct HashEmbedding {
    dimension: usize,
    offline: AtomicBool,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl EmbeddingModel for HashEmbedding {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingModelError> {
        texts.iter().map(|text| self.embed_query(text)).collect()
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingModelError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EmbeddingModelError::new(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "embedding offline",
            )));
        }
        let mut vector = vec![0.0; self.dimension];
        for ch in text.chars() {
            vector[ch as usize % self.dimension] += 1.0;
        }
        Ok(vector)
    }
}

pub(crate) struct Fixture {
    pub _dir: TempDir,
    pub store: ProjectStore,
    pub prompts: PromptRegistry,
    pub knowledge: KnowledgeIndex,
    pub embedding: Arc<HashEmbedding>,
    pub sink: Arc<VecLogSink>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let embedding = Arc::new(HashEmbedding::new(32));
        let sink = Arc::new(VecLogSink::new());
        let knowledge =
            KnowledgeIndex::new(dir.path().join("vectorstore"), embedding.clone(), sink.clone());
        Self {
            store: ProjectStore::open(dir.path().join("novels")),
            prompts: PromptRegistry::new().unwrap(),
            knowledge,
            embedding,
            sink,
            _dir: dir,
        }
    }

    pub fn project(&self, chapter_count: u32) -> Project {
        self.store
            .insert(&NewProject {
                title: "星海残响".into(),
                genre: "科幻".into(),
                topic: "失落文明的回声".into(),
                chapter_count,
                target_words_per_chapter: 2500,
            })
            .unwrap()
    }
}
