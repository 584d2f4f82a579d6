//! Per-project knowledge retrieval index.
//!
//! Each project owns one JSON file of `(pageContent, metadata, vector)`
//! records under `<root>/<project_id>/vector_data.json`. Search rebuilds a
//! cosine index from that file and walks an ordered list of strategies until
//! one of them produces hits.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::embedding::{EmbeddingModel, EmbeddingModelError};
use crate::error::ErrorKind;
use crate::fsio::{read_optional, remove_if_exists, write_atomic};
use crate::logging::{LogLevel, LogRecord, LogSink, SharedLogSink};
use crate::project::{validate_id, KeyedLocks};

mod record;
mod segment;
mod similarity;
mod strategy;

pub use record::{DocumentMetadata, DocumentType, KnowledgeDocument, INDEX_FILE_NAME};
pub use segment::{split_text_segments, DEFAULT_SEGMENT_CHAR_LIMIT};

use record::{IndexFile, StoredDocument};
use similarity::SimilarityIndex;
use strategy::{default_strategies, SearchContext, SearchStrategy, StrategyOutcome};

pub const DEFAULT_RETRIEVAL_K: usize = 4;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("非法的项目 ID `{0}`")]
    InvalidId(String),
    #[error("文本数量 ({texts}) 与元数据数量 ({metadatas}) 不一致")]
    LengthMismatch { texts: usize, metadatas: usize },
    #[error("第 {index} 条文本为空")]
    EmptyContent { index: usize },
    #[error("导入的知识内容为空")]
    EmptyImport,
    #[error("未配置 Embedding 接口，无法写入知识库")]
    EmbeddingUnavailable,
    #[error("向量化失败: {0}")]
    Embedding(#[source] EmbeddingModelError),
    #[error("向量数量 ({actual}) 与文本数量 ({expected}) 不一致")]
    VectorCountMismatch { expected: usize, actual: usize },
    #[error("向量维度 ({actual}) 与索引维度 ({expected}) 不一致")]
    DimensionMismatch { expected: usize, actual: usize },
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

impl KnowledgeError {
    pub fn is_embedding_failure(&self) -> bool {
        matches!(
            self,
            Self::Embedding(_) | Self::VectorCountMismatch { .. } | Self::DimensionMismatch { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_embedding_failure() {
            ErrorKind::GenerationFailure
        } else if matches!(self, Self::EmbeddingUnavailable) {
            ErrorKind::PrerequisiteMissing
        } else {
            ErrorKind::StorageFailure
        }
    }
}

/// Storage and retrieval of knowledge documents, one index per project.
pub trait KnowledgeBase: Send + Sync {
    /// Creates an empty index unless one already exists.
    fn create_index(&self, project_id: &str) -> Result<(), KnowledgeError>;

    /// Embeds and appends documents, creating the index when missing.
    /// Returns the number of documents stored.
    fn add(
        &self,
        project_id: &str,
        texts: &[String],
        metadatas: &[DocumentMetadata],
    ) -> Result<usize, KnowledgeError>;

    /// Stores `text` as the document of chapter `number`, dropping any
    /// earlier version of that chapter.
    fn replace_chapter(
        &self,
        project_id: &str,
        number: u32,
        text: &str,
    ) -> Result<usize, KnowledgeError>;

    /// Never fails; problems are logged and yield no hits.
    fn search(&self, project_id: &str, query: &str) -> Vec<KnowledgeDocument>;

    /// Removes the index file. Returns whether one existed.
    fn delete_index(&self, project_id: &str) -> Result<bool, KnowledgeError>;

    fn exists(&self, project_id: &str) -> bool;
}

/// Used when no embedding provider is configured: stores nothing, finds nothing.
#[derive(Debug, Default)]
pub struct DisabledKnowledgeBase;

impl KnowledgeBase for DisabledKnowledgeBase {
    fn create_index(&self, _project_id: &str) -> Result<(), KnowledgeError> {
        Ok(())
    }

    fn add(
        &self,
        _project_id: &str,
        _texts: &[String],
        _metadatas: &[DocumentMetadata],
    ) -> Result<usize, KnowledgeError> {
        Ok(0)
    }

    fn replace_chapter(
        &self,
        _project_id: &str,
        _number: u32,
        _text: &str,
    ) -> Result<usize, KnowledgeError> {
        Ok(0)
    }

    fn search(&self, _project_id: &str, _query: &str) -> Vec<KnowledgeDocument> {
        Vec::new()
    }

    fn delete_index(&self, _project_id: &str) -> Result<bool, KnowledgeError> {
        Ok(false)
    }

    fn exists(&self, _project_id: &str) -> bool {
        false
    }
}

/// File-backed [`KnowledgeBase`].
///
/// An index opened with [`KnowledgeIndex::files`] has no embedding provider:
/// it can create, delete and substring-search index files but not add to them.
pub struct KnowledgeIndex {
    root: PathBuf,
    embedding: Option<Arc<dyn EmbeddingModel>>,
    k: usize,
    strategies: Vec<Box<dyn SearchStrategy>>,
    locks: KeyedLocks,
    sink: SharedLogSink,
}

impl KnowledgeIndex {
    pub fn new(
        root: impl Into<PathBuf>,
        embedding: Arc<dyn EmbeddingModel>,
        sink: SharedLogSink,
    ) -> Self {
        Self::with_embedding(root.into(), Some(embedding), sink)
    }

    pub fn files(root: impl Into<PathBuf>, sink: SharedLogSink) -> Self {
        Self::with_embedding(root.into(), None, sink)
    }

    fn with_embedding(
        root: PathBuf,
        embedding: Option<Arc<dyn EmbeddingModel>>,
        sink: SharedLogSink,
    ) -> Self {
        Self {
            root,
            embedding,
            k: DEFAULT_RETRIEVAL_K,
            strategies: default_strategies(),
            locks: KeyedLocks::new(),
            sink,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self, project_id: &str) -> Result<PathBuf, KnowledgeError> {
        validate_id(project_id).map_err(|_| KnowledgeError::InvalidId(project_id.to_string()))?;
        Ok(self.root.join(project_id).join(INDEX_FILE_NAME))
    }

    fn load(&self, path: &Path) -> Result<Option<IndexFile>, KnowledgeError> {
        let Some(text) = read_optional(path).map_err(|source| KnowledgeError::Read {
            path: path.to_path_buf(),
            source,
        })?
        else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| KnowledgeError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    fn persist(&self, path: &Path, file: &IndexFile) -> Result<(), KnowledgeError> {
        let json = serde_json::to_vec(file).map_err(|source| KnowledgeError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, &json).map_err(|source| KnowledgeError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn model_name(&self) -> Option<String> {
        self.embedding
            .as_ref()
            .and_then(|embedding| embedding.model_name())
            .map(str::to_string)
    }

    fn empty_file(&self, project_id: &str) -> IndexFile {
        IndexFile::empty(project_id, self.model_name())
    }

    fn try_search(
        &self,
        project_id: &str,
        query: &str,
    ) -> Result<Vec<KnowledgeDocument>, KnowledgeError> {
        let path = self.index_path(project_id)?;
        let Some(file) = self.load(&path)? else {
            self.log(LogLevel::Debug, format!("知识库不存在：{project_id}"));
            return Ok(Vec::new());
        };
        if file.documents.is_empty() {
            return Ok(Vec::new());
        }

        let index = SimilarityIndex::build(&file.documents);
        let ctx = SearchContext {
            query,
            records: &file.documents,
            index: &index,
            embedding: self.embedding.as_deref(),
            k: self.k,
        };
        for strategy in &self.strategies {
            match strategy.search(&ctx) {
                StrategyOutcome::Found(docs) => {
                    self.log(
                        LogLevel::Debug,
                        format!("知识检索（{}）命中 {} 条", strategy.name(), docs.len()),
                    );
                    return Ok(docs);
                }
                StrategyOutcome::TryNext(reason) => self.log(
                    LogLevel::Warn,
                    format!("知识检索策略 {} 未命中，尝试下一种：{reason}", strategy.name()),
                ),
            }
        }
        Ok(Vec::new())
    }

    /// Embeds `texts` and appends them after dropping the stored documents
    /// `superseded` selects.
    fn store(
        &self,
        project_id: &str,
        texts: &[String],
        metadatas: &[DocumentMetadata],
        superseded: impl Fn(&DocumentMetadata) -> bool,
    ) -> Result<usize, KnowledgeError> {
        if texts.len() != metadatas.len() {
            return Err(KnowledgeError::LengthMismatch {
                texts: texts.len(),
                metadatas: metadatas.len(),
            });
        }
        if let Some(index) = texts.iter().position(|text| text.trim().is_empty()) {
            return Err(KnowledgeError::EmptyContent { index });
        }
        if texts.is_empty() {
            return Ok(0);
        }
        let path = self.index_path(project_id)?;
        let embedding = self
            .embedding
            .as_ref()
            .ok_or(KnowledgeError::EmbeddingUnavailable)?;

        let vectors = embedding
            .embed_documents(texts)
            .map_err(KnowledgeError::Embedding)?;
        if vectors.len() != texts.len() {
            return Err(KnowledgeError::VectorCountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }

        self.locks.with_lock(project_id, || {
            let mut file = self
                .load(&path)?
                .unwrap_or_else(|| self.empty_file(project_id));
            file.documents.retain(|stored| !superseded(&stored.metadata));
            let expected = file
                .dimension()
                .or_else(|| vectors.first().map(Vec::len))
                .unwrap_or_default();
            if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected) {
                return Err(KnowledgeError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }

            file.documents.extend(
                texts
                    .iter()
                    .zip(metadatas)
                    .zip(vectors)
                    .map(|((text, metadata), vector)| StoredDocument {
                        content: text.clone(),
                        metadata: metadata.clone(),
                        vector,
                    }),
            );
            if file.embedding_model.is_none() {
                file.embedding_model = embedding.model_name().map(str::to_string);
            }
            file.updated_at = Utc::now();
            self.persist(&path, &file)?;
            self.log(
                LogLevel::Info,
                format!(
                    "已写入知识库 {project_id}：{} 条，共 {} 条",
                    texts.len(),
                    file.documents.len()
                ),
            );
            Ok(texts.len())
        })
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message.into()));
    }
}

impl KnowledgeBase for KnowledgeIndex {
    fn create_index(&self, project_id: &str) -> Result<(), KnowledgeError> {
        let path = self.index_path(project_id)?;
        self.locks.with_lock(project_id, || {
            if path.is_file() {
                return Ok(());
            }
            self.persist(&path, &self.empty_file(project_id))
        })
    }

    fn add(
        &self,
        project_id: &str,
        texts: &[String],
        metadatas: &[DocumentMetadata],
    ) -> Result<usize, KnowledgeError> {
        self.store(project_id, texts, metadatas, |_| false)
    }

    fn replace_chapter(
        &self,
        project_id: &str,
        number: u32,
        text: &str,
    ) -> Result<usize, KnowledgeError> {
        let metadata = DocumentMetadata::new(DocumentType::Chapter, project_id).with_chapter(number);
        self.store(project_id, &[text.to_string()], &[metadata], |stored| {
            stored.doc_type == DocumentType::Chapter && stored.chapter_number == Some(number)
        })
    }

    fn search(&self, project_id: &str, query: &str) -> Vec<KnowledgeDocument> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        match self.try_search(project_id, query) {
            Ok(docs) => docs,
            Err(err) => {
                self.log(LogLevel::Warn, format!("知识检索失败（{project_id}）：{err}"));
                Vec::new()
            }
        }
    }

    fn delete_index(&self, project_id: &str) -> Result<bool, KnowledgeError> {
        let path = self.index_path(project_id)?;
        self.locks.with_lock(project_id, || {
            remove_if_exists(&path).map_err(|source| KnowledgeError::Remove { path, source })
        })
    }

    fn exists(&self, project_id: &str) -> bool {
        self.index_path(project_id)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }
}

/// Splits `text` into segments and stores them as `knowledge` documents
/// tagged with `filename`. Returns the number of stored segments.
pub fn import_knowledge(
    knowledge: &dyn KnowledgeBase,
    project_id: &str,
    filename: &str,
    text: &str,
) -> Result<usize, KnowledgeError> {
    let segments = split_text_segments(text, DEFAULT_SEGMENT_CHAR_LIMIT);
    if segments.is_empty() {
        return Err(KnowledgeError::EmptyImport);
    }
    let metadata =
        DocumentMetadata::new(DocumentType::Knowledge, project_id).with_filename(filename);
    let metadatas = vec![metadata; segments.len()];
    knowledge.add(project_id, &segments, &metadatas)
}

/// Drops every stored document and leaves an empty index behind.
pub fn clear_index(knowledge: &dyn KnowledgeBase, project_id: &str) -> Result<(), KnowledgeError> {
    knowledge.delete_index(project_id)?;
    knowledge.create_index(project_id)
}

/// Stores one generated artifact; a chapter replaces its earlier version.
/// Failures are logged and swallowed so that a broken embedding provider
/// never undoes a completed generation step.
pub(crate) fn ingest(
    knowledge: &dyn KnowledgeBase,
    sink: &dyn LogSink,
    text: &str,
    metadata: DocumentMetadata,
) {
    if text.trim().is_empty() {
        return;
    }
    let project_id = metadata.project_id.clone();
    let doc_type = metadata.doc_type;
    let result = match (doc_type, metadata.chapter_number) {
        (DocumentType::Chapter, Some(number)) => {
            knowledge.replace_chapter(&project_id, number, text)
        }
        _ => knowledge.add(&project_id, &[text.to_string()], &[metadata]),
    };
    if let Err(err) = result {
        sink.log(LogRecord::new(
            LogLevel::Warn,
            format!("写入知识库失败（{doc_type:?}）：{err}"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{NullLogSink, VecLogSink};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    /// Buckets characters into a small fixed-size vector.
    struct CharHashEmbedding {
        dimension: usize,
        offline: AtomicBool,
    }

    impl CharHashEmbedding {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                offline: AtomicBool::new(false),
            }
        }

        fn vector(&self, text: &str) -> Vec<f32> {
            let mut vector = vec![0.0; self.dimension];
            for ch in text.chars() {
                vector[ch as usize % self.dimension] += 1.0;
            }
            vector
        }
    }

    impl EmbeddingModel for CharHashEmbedding {
        fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingModelError> {
            texts.iter().map(|text| self.embed_query(text)).collect()
        }

        fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingModelError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(EmbeddingModelError::new(io::Error::new(
                    io::ErrorKind::Other,
                    "offline",
                )));
            }
            Ok(self.vector(text))
        }

        fn model_name(&self) -> Option<&str> {
            Some("char-hash")
        }
    }

    fn index(
        root: &Path,
        dimension: usize,
    ) -> (KnowledgeIndex, Arc<CharHashEmbedding>, Arc<VecLogSink>) {
        let embedding = Arc::new(CharHashEmbedding::new(dimension));
        let sink = Arc::new(VecLogSink::new());
        let index = KnowledgeIndex::new(root, embedding.clone(), sink.clone());
        (index, embedding, sink)
    }

    fn meta(doc_type: DocumentType) -> DocumentMetadata {
        DocumentMetadata::new(doc_type, "novel-1")
    }

    #[test]
    fn add_then_search_returns_the_closest_document() {
        let dir = tempdir().unwrap();
        let (index, _, _) = index(dir.path(), 64);
        let texts = vec!["青云宗山门".to_string(), "海底沉船宝藏".to_string()];
        let stored = index
            .add(
                "novel-1",
                &texts,
                &[meta(DocumentType::Knowledge), meta(DocumentType::Chapter).with_chapter(2)],
            )
            .unwrap();
        assert_eq!(stored, 2);

        let hits = index.search("novel-1", "沉船宝藏");
        assert_eq!(hits[0].content, "海底沉船宝藏");
        assert_eq!(hits[0].metadata.chapter_number, Some(2));
        assert!(hits[0].score.is_some());

        let raw = std::fs::read_to_string(dir.path().join("novel-1").join(INDEX_FILE_NAME)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["embeddingModel"], "char-hash");
        assert_eq!(value["documents"][1]["pageContent"], "海底沉船宝藏");
    }

    #[test]
    fn rejects_mismatched_lengths_and_blank_texts() {
        let dir = tempdir().unwrap();
        let (index, _, _) = index(dir.path(), 8);
        let err = index
            .add("novel-1", &["一".to_string()], &[])
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::LengthMismatch { texts: 1, metadatas: 0 }));

        let err = index
            .add(
                "novel-1",
                &["有内容".to_string(), "  ".to_string()],
                &[meta(DocumentType::Knowledge), meta(DocumentType::Knowledge)],
            )
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::EmptyContent { index: 1 }));
        assert!(!index.exists("novel-1"));
    }

    #[test]
    fn switching_embedding_dimension_is_rejected_on_add() {
        let dir = tempdir().unwrap();
        let (small, _, _) = index(dir.path(), 8);
        small
            .add("novel-1", &["旧模型".to_string()], &[meta(DocumentType::Knowledge)])
            .unwrap();

        let (large, _, _) = index(dir.path(), 16);
        let err = large
            .add("novel-1", &["新模型".to_string()], &[meta(DocumentType::Knowledge)])
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::DimensionMismatch { expected: 8, actual: 16 }));
        assert!(err.is_embedding_failure());
    }

    #[test]
    fn query_embedding_failure_falls_back_to_substring_match() {
        let dir = tempdir().unwrap();
        let (index, embedding, sink) = index(dir.path(), 32);
        index
            .add(
                "novel-1",
                &["主角林远拜入青云宗".to_string(), "反派潜伏在王都".to_string()],
                &[meta(DocumentType::Chapter), meta(DocumentType::Chapter)],
            )
            .unwrap();

        embedding.offline.store(true, Ordering::SeqCst);
        let hits = index.search("novel-1", "王都");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "反派潜伏在王都");
        assert_eq!(hits[0].score, None);
        assert!(sink.contains(LogLevel::Warn, "vector"));
        assert!(sink.contains(LogLevel::Warn, "scored"));
    }

    #[test]
    fn missing_blank_or_corrupt_index_yields_no_hits() {
        let dir = tempdir().unwrap();
        let (index, _, sink) = index(dir.path(), 8);
        assert!(index.search("novel-1", "任何").is_empty());

        index.create_index("novel-1").unwrap();
        assert!(index.search("novel-1", "   ").is_empty());
        assert!(index.search("novel-1", "任何").is_empty());

        std::fs::write(dir.path().join("novel-1").join(INDEX_FILE_NAME), "{broken").unwrap();
        assert!(index.search("novel-1", "任何").is_empty());
        assert!(sink.contains(LogLevel::Warn, "知识检索失败"));
    }

    #[test]
    fn delete_does_not_recreate_and_clear_leaves_empty_index() {
        let dir = tempdir().unwrap();
        let (index, _, _) = index(dir.path(), 8);
        import_knowledge(&index, "novel-1", "设定.txt", "第一条设定。第二条设定。").unwrap();
        assert!(index.exists("novel-1"));

        clear_index(&index, "novel-1").unwrap();
        assert!(index.exists("novel-1"));
        assert!(index.search("novel-1", "设定").is_empty());

        assert!(index.delete_index("novel-1").unwrap());
        assert!(!index.delete_index("novel-1").unwrap());
        assert!(!index.exists("novel-1"));
    }

    #[test]
    fn import_tags_segments_with_filename() {
        let dir = tempdir().unwrap();
        let (index, embedding, _) = index(dir.path(), 8);
        let count = import_knowledge(&index, "novel-1", "world.md", "龙族栖息北境。人类定居南方。").unwrap();
        assert_eq!(count, 1);

        embedding.offline.store(true, Ordering::SeqCst);
        let hits = index.search("novel-1", "北境");
        assert_eq!(hits[0].metadata.filename.as_deref(), Some("world.md"));
        assert_eq!(hits[0].metadata.doc_type, DocumentType::Knowledge);

        assert!(matches!(
            import_knowledge(&index, "novel-1", "empty.md", " \n "),
            Err(KnowledgeError::EmptyImport)
        ));
    }

    #[test]
    fn ingest_swallows_embedding_failures() {
        let dir = tempdir().unwrap();
        let (index, embedding, _) = index(dir.path(), 8);
        embedding.offline.store(true, Ordering::SeqCst);
        let sink = VecLogSink::new();
        ingest(&index, &sink, "架构正文", meta(DocumentType::Architecture));
        assert!(sink.contains(LogLevel::Warn, "写入知识库失败"));
        assert!(!index.exists("novel-1"));
    }

    #[test]
    fn file_only_index_manages_files_without_embedding() {
        let dir = tempdir().unwrap();
        let (full, _, _) = index(dir.path(), 8);
        full.add("novel-1", &["秘密设定".to_string()], &[meta(DocumentType::Knowledge)])
            .unwrap();

        let files = KnowledgeIndex::files(dir.path(), Arc::new(NullLogSink));
        assert!(files.exists("novel-1"));
        assert_eq!(files.search("novel-1", "秘密")[0].content, "秘密设定");
        let err = files
            .add("novel-1", &["新设定".to_string()], &[meta(DocumentType::Knowledge)])
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::EmbeddingUnavailable));
        assert_eq!(err.kind(), ErrorKind::PrerequisiteMissing);

        assert!(files.delete_index("novel-1").unwrap());
        assert!(full.search("novel-1", "秘密").is_empty());

        files.create_index("novel-2").unwrap();
        assert!(full.exists("novel-2"));
    }

    #[test]
    fn replacing_a_chapter_drops_its_earlier_version() {
        let dir = tempdir().unwrap();
        let (index, embedding, _) = index(dir.path(), 16);
        index
            .add("novel-1", &["世界观总览".to_string()], &[meta(DocumentType::Architecture)])
            .unwrap();
        index.replace_chapter("novel-1", 2, "初稿：林远下山").unwrap();
        index.replace_chapter("novel-1", 3, "第三章：王都").unwrap();
        index.replace_chapter("novel-1", 2, "定稿：林远下山").unwrap();

        embedding.offline.store(true, Ordering::SeqCst);
        let hits = index.search("novel-1", "林远下山");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "定稿：林远下山");
        assert_eq!(hits[0].metadata.chapter_number, Some(2));
        assert_eq!(index.search("novel-1", "王都").len(), 1);
        assert_eq!(index.search("novel-1", "世界观").len(), 1);
    }
}
