mod builder;
pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod embedder;
pub mod error;
pub mod index;
mod metrics;
pub mod searcher;
mod server;
pub mod utils;

pub use builder::{BuildReport, BuiltIndex, IndexBuilder};
pub use config::Opts;
pub use context::ExecutionContext;
pub use dispatch::{QueryDispatcher, QueryImage};
pub use embedder::{Embedder, EmbeddingVector, VitEmbedder};
pub use error::{Error, Result};
pub use index::{FlatIndex, IndexArtifact, Metric};
pub use searcher::{IndexStatus, SearchHit, Searcher};
