//! Kaizen LLM - Model Gateway and Tip Pipeline
//!
//! Provider-agnostic async traits for completions and embeddings, plus the
//! LLM-mediated pieces of the memory pipeline:
//! - Response cleaning for free-text JSON modes
//! - Conflict resolution between new and existing entities
//! - Trajectory parsing and tip generation
//! - Tip clustering and consolidation

mod clean;
mod clustering;
mod conflict;
mod embedding;
mod gateway;
mod prompts;
mod tips;
mod trajectory;

pub use clean::clean_llm_response;
pub use clustering::{cluster_entities, combine_cluster, union_find, MAX_CLUSTER_ENTITIES};
pub use conflict::ConflictResolver;
pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use gateway::{CompletionModel, CompletionRequest, HttpCompletionModel, MockCompletionModel};
pub use tips::{tip_generation_schema, TipGenerator};
pub use trajectory::{parse_trajectory, ParsedTrajectory, StepKind, TrajectoryStep};
