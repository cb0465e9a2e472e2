pub mod embedding_provider;
pub mod similarity;

pub use embedding_provider::{EmbeddingHealth, EmbeddingProvider, EmbeddingStats};
pub use similarity::{cosine_similarity, SearchResults, SimilarityIndex, SimilarityMatch};
