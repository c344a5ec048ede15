pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod metadata;
mod metrics;
pub mod query;
pub mod server;
pub mod snapshot;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
pub use extractor::{Embedding, FeatureExtractor, ResNetExtractor};
pub use index::{FlatIndex, Neighbor};
pub use ingest::{ImageSource, IngestReport, IngestionPipeline, LocalImageSource};
pub use metadata::{AlbumRecord, MetadataStore};
pub use query::{QueryService, SearchHit};
pub use snapshot::{Snapshot, SnapshotCell, StoreLock, StorePaths};
