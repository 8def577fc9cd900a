//! Semantic audio search: natural-language queries ranked against CLAP-style
//! audio embeddings, with translation, song/sfx routing and musicness
//! re-ranking.

pub mod audio;
pub mod config;
pub mod content_type;
pub mod embedding;
pub mod error;
pub mod index;
pub mod indexer;
pub mod npz;
pub mod pipeline;
pub mod query;
pub mod server;
pub mod translation;

pub use config::Settings;
pub use content_type::{ContentClassifier, ContentType, ContentTypeDetection, KeywordContentDetector};
pub use embedding::{EmbeddingBackend, EmbeddingProvider, HashBackend};
pub use error::{AudioSearchError, Result};
pub use index::{SearchResult, SimilarityIndex};
pub use indexer::{run_index_job, IndexJob, IndexSummary};
pub use pipeline::{AudioResult, PipelineError, SearchPipeline, SearchRequest, SearchResponse};
pub use query::{EnhancedQuery, QueryEnhancer};
pub use translation::{LanguageResolver, ProcessedQuery};
