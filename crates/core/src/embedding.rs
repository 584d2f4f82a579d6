use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

#[derive(Debug)]
pub struct EmbeddingModelError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl EmbeddingModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }

    pub fn as_inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Display for EmbeddingModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for EmbeddingModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Produces fixed-dimension vectors for text. One model yields one dimension.
pub trait EmbeddingModel: Send + Sync {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingModelError>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingModelError>;

    /// Identifier persisted next to stored vectors, when the provider knows it.
    fn model_name(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmbeddingInputError {
    #[error("no texts supplied for embedding")]
    Empty,
    #[error("text #{index} is blank and cannot be embedded")]
    Blank { index: usize },
}

/// Rejects inputs no provider can embed. Adapters call this before any request.
pub fn ensure_embeddable<S: AsRef<str>>(texts: &[S]) -> Result<(), EmbeddingInputError> {
    if texts.is_empty() {
        return Err(EmbeddingInputError::Empty);
    }
    match texts.iter().position(|text| text.as_ref().trim().is_empty()) {
        Some(index) => Err(EmbeddingInputError::Blank { index }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_batches_and_blank_entries() {
        let none: [&str; 0] = [];
        assert_eq!(ensure_embeddable(&none), Err(EmbeddingInputError::Empty));
        assert_eq!(
            ensure_embeddable(&["第一段", "  \n"]),
            Err(EmbeddingInputError::Blank { index: 1 })
        );
        assert!(ensure_embeddable(&["第一段".to_string()]).is_ok());
    }
}
