pub mod archive;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod index;
pub mod lock;
pub mod merge;
pub mod metrics;
pub mod rank;
pub mod reconcile;
pub mod utils;

pub use archive::{Archive, ArchiveEntry};
pub use config::Opts;
pub use encoder::{Encoder, ThumbnailEncoder};
pub use engine::{Engine, EngineBuilder, Query, QueryOutcome};
pub use error::Error;
