use super::record::StoredDocument;

/// In-memory cosine index rebuilt from the persisted records on every load.
#[derive(Debug)]
pub(crate) struct SimilarityIndex {
    dimension: Option<usize>,
    uniform: bool,
    norms: Vec<f32>,
}

impl SimilarityIndex {
    pub fn build(records: &[StoredDocument]) -> Self {
        let dimension = records.first().map(|doc| doc.vector.len());
        let uniform = records
            .iter()
            .all(|doc| Some(doc.vector.len()) == dimension && !doc.vector.is_empty());
        let norms = records.iter().map(|doc| norm(&doc.vector)).collect();
        Self {
            dimension,
            uniform,
            norms,
        }
    }

    /// Dimension of the stored vectors when every record agrees on one.
    pub fn uniform_dimension(&self) -> Option<usize> {
        if self.uniform {
            self.dimension
        } else {
            None
        }
    }

    /// Cosine similarity between `query` and record `position`. `None` when
    /// the dimensions differ or either vector has zero length.
    pub fn score(&self, records: &[StoredDocument], position: usize, query: &[f32]) -> Option<f32> {
        let record = records.get(position)?;
        if record.vector.len() != query.len() || query.is_empty() {
            return None;
        }
        let record_norm = *self.norms.get(position)?;
        let query_norm = norm(query);
        if record_norm == 0.0 || query_norm == 0.0 {
            return None;
        }
        let dot: f32 = record
            .vector
            .iter()
            .zip(query)
            .map(|(a, b)| a * b)
            .sum();
        Some(dot / (record_norm * query_norm))
    }
}

fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Sorts `(position, score)` pairs best-first and keeps `k`.
pub(crate) fn top_k(mut scored: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    scored
}
