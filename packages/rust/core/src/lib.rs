//! Domain discovery engine for domainscout.
//!
//! Extracts domain candidates from parsed document blocks, scores candidate
//! pairs with embeddings, clusters them with a dual-threshold union-find that
//! honours human rejections, and writes canonical domains. [`pipeline`] ties
//! the pieces into a single `run`.

pub mod blocking;
pub mod candidates;
pub mod embedding;
pub mod merge;
pub mod naming;
pub mod normalize;
pub mod persist;
pub mod pipeline;
pub mod representation;
pub mod similarity;
pub mod tokenization;

pub use embedding::{Embedder, EmbeddingBatch, HttpEmbedder};
pub use pipeline::{NothingToDo, ProgressReporter, RunOutcome, RunSummary, SilentProgress, run_pipeline};
pub use tokenization::{PreparedTexts, Tokenizer};
