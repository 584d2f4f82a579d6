use crate::embedding::EmbeddingModel;

use super::record::{KnowledgeDocument, StoredDocument};
use super::similarity::{top_k, SimilarityIndex};

/// Everything a strategy may look at for one query.
pub(crate) struct SearchContext<'a> {
    pub query: &'a str,
    pub records: &'a [StoredDocument],
    pub index: &'a SimilarityIndex,
    /// `None` for an index opened without an embedding provider.
    pub embedding: Option<&'a dyn EmbeddingModel>,
    pub k: usize,
}

impl SearchContext<'_> {
    fn query_vector(&self) -> Result<Vec<f32>, String> {
        let Some(embedding) = self.embedding else {
            return Err("未配置 Embedding 接口".to_string());
        };
        embedding
            .embed_query(self.query)
            .map_err(|err| format!("查询向量化失败：{err}"))
    }
}

pub(crate) enum StrategyOutcome {
    Found(Vec<KnowledgeDocument>),
    /// The strategy could not answer; the reason is logged before the next
    /// strategy runs.
    TryNext(String),
}

pub(crate) trait SearchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn search(&self, ctx: &SearchContext<'_>) -> StrategyOutcome;
}

/// The standard chain: strict vector search, tolerant vector scoring, then
/// plain substring matching.
pub(crate) fn default_strategies() -> Vec<Box<dyn SearchStrategy>> {
    vec![
        Box::new(VectorSimilarity),
        Box::new(ScoredSimilarity),
        Box::new(SubstringMatch),
    ]
}

/// Cosine search over an index whose vectors all share the query's dimension.
pub(crate) struct VectorSimilarity;

impl SearchStrategy for VectorSimilarity {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn search(&self, ctx: &SearchContext<'_>) -> StrategyOutcome {
        let query_vector = match ctx.query_vector() {
            Ok(vector) => vector,
            Err(reason) => return StrategyOutcome::TryNext(reason),
        };
        match ctx.index.uniform_dimension() {
            Some(dimension) if dimension == query_vector.len() => {}
            Some(dimension) => {
                return StrategyOutcome::TryNext(format!(
                    "向量维度不一致：索引 {dimension}，查询 {}",
                    query_vector.len()
                ))
            }
            None => return StrategyOutcome::TryNext("索引中的向量维度不统一".to_string()),
        }

        let mut scored = Vec::with_capacity(ctx.records.len());
        for position in 0..ctx.records.len() {
            match ctx.index.score(ctx.records, position, &query_vector) {
                Some(score) if score.is_finite() => scored.push((position, score)),
                _ => {
                    return StrategyOutcome::TryNext(format!("第 {position} 条记录无法计算相似度"))
                }
            }
        }
        StrategyOutcome::Found(collect(ctx, top_k(scored, ctx.k)))
    }
}

/// Scores each record on its own and skips the ones that cannot be compared.
pub(crate) struct ScoredSimilarity;

impl SearchStrategy for ScoredSimilarity {
    fn name(&self) -> &'static str {
        "scored"
    }

    fn search(&self, ctx: &SearchContext<'_>) -> StrategyOutcome {
        let query_vector = match ctx.query_vector() {
            Ok(vector) => vector,
            Err(reason) => return StrategyOutcome::TryNext(reason),
        };
        let scored: Vec<(usize, f32)> = (0..ctx.records.len())
            .filter_map(|position| {
                ctx.index
                    .score(ctx.records, position, &query_vector)
                    .filter(|score| score.is_finite())
                    .map(|score| (position, score))
            })
            .collect();
        if scored.is_empty() {
            return StrategyOutcome::TryNext("没有可比较的向量记录".to_string());
        }
        StrategyOutcome::Found(collect(ctx, top_k(scored, ctx.k)))
    }
}

/// Case-insensitive substring match on the stored text, in stored order.
pub(crate) struct SubstringMatch;

impl SearchStrategy for SubstringMatch {
    fn name(&self) -> &'static str {
        "substring"
    }

    fn search(&self, ctx: &SearchContext<'_>) -> StrategyOutcome {
        let needle = ctx.query.trim().to_lowercase();
        let hits: Vec<KnowledgeDocument> = ctx
            .records
            .iter()
            .filter(|record| record.content.to_lowercase().contains(&needle))
            .take(ctx.k)
            .map(|record| record.to_document(None))
            .collect();
        if hits.is_empty() {
            StrategyOutcome::TryNext("文本匹配无结果".to_string())
        } else {
            StrategyOutcome::Found(hits)
        }
    }
}

fn collect(ctx: &SearchContext<'_>, ranked: Vec<(usize, f32)>) -> Vec<KnowledgeDocument> {
    ranked
        .into_iter()
        .filter_map(|(position, score)| {
            ctx.records
                .get(position)
                .map(|record| record.to_document(Some(score)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingModelError;
    use crate::knowledge::record::{DocumentMetadata, DocumentType};
    use std::io;

    struct Fixed(Option<Vec<f32>>);

    impl EmbeddingModel for Fixed {
        fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingModelError> {
            texts.iter().map(|text| self.embed_query(text)).collect()
        }

        fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbeddingModelError> {
            self.0.clone().ok_or_else(|| {
                EmbeddingModelError::new(io::Error::new(io::ErrorKind::Other, "offline"))
            })
        }
    }

    fn record(content: &str, vector: Vec<f32>) -> StoredDocument {
        StoredDocument {
            content: content.into(),
            metadata: DocumentMetadata::new(DocumentType::Knowledge, "p"),
            vector,
        }
    }

    fn run(
        strategy: &dyn SearchStrategy,
        query: &str,
        records: &[StoredDocument],
        embedding: &Fixed,
    ) -> StrategyOutcome {
        let index = SimilarityIndex::build(records);
        strategy.search(&SearchContext {
            query,
            records,
            index: &index,
            embedding: Some(embedding),
            k: 2,
        })
    }

    #[test]
    fn vector_search_ranks_by_cosine() {
        let records = vec![
            record("北境", vec![0.0, 1.0]),
            record("王都", vec![1.0, 0.0]),
            record("边城", vec![0.7, 0.7]),
        ];
        let outcome = run(&VectorSimilarity, "王都", &records, &Fixed(Some(vec![1.0, 0.0])));
        let StrategyOutcome::Found(docs) = outcome else {
            panic!("expected hits");
        };
        let contents: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["王都", "边城"]);
        assert!(docs[0].score.unwrap() > docs[1].score.unwrap());
    }

    #[test]
    fn strict_search_defers_on_mixed_dimensions_while_scored_skips_them() {
        let records = vec![record("旧向量", vec![1.0, 0.0, 0.0]), record("新向量", vec![1.0, 0.0])];
        let embedding = Fixed(Some(vec![1.0, 0.0]));

        assert!(matches!(
            run(&VectorSimilarity, "q", &records, &embedding),
            StrategyOutcome::TryNext(_)
        ));
        let StrategyOutcome::Found(docs) = run(&ScoredSimilarity, "q", &records, &embedding) else {
            panic!("expected hits");
        };
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "新向量");
    }

    #[test]
    fn substring_match_ignores_case_and_caps_at_k() {
        let records = vec![
            record("Dragon 巢穴", vec![]),
            record("dragon 之心", vec![]),
            record("DRAGON 骑士", vec![]),
            record("无关", vec![]),
        ];
        let StrategyOutcome::Found(docs) = run(&SubstringMatch, "dragon", &records, &Fixed(None)) else {
            panic!("expected hits");
        };
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.score.is_none()));
    }

    #[test]
    fn embedding_failure_defers_to_next_strategy() {
        let records = vec![record("片段", vec![1.0])];
        assert!(matches!(
            run(&VectorSimilarity, "片段", &records, &Fixed(None)),
            StrategyOutcome::TryNext(_)
        ));
    }

    #[test]
    fn missing_embedding_leaves_only_substring_match() {
        let records = vec![record("王都夜色", vec![1.0, 0.0])];
        let index = SimilarityIndex::build(&records);
        let ctx = SearchContext {
            query: "王都",
            records: &records,
            index: &index,
            embedding: None,
            k: 2,
        };
        assert!(matches!(VectorSimilarity.search(&ctx), StrategyOutcome::TryNext(_)));
        assert!(matches!(ScoredSimilarity.search(&ctx), StrategyOutcome::TryNext(_)));
        let StrategyOutcome::Found(docs) = SubstringMatch.search(&ctx) else {
            panic!("expected hits");
        };
        assert_eq!(docs[0].content, "王都夜色");
    }
}
