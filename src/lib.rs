//! fieldconsensus - shared facts from captured property-management pages
//!
//! This library labels captured form fields by asking several LLM providers
//! at once and voting on their answers, deduplicates contacts and other
//! facts seen across pages into shared data elements, and pulls
//! calculations out of rendered HTML.

pub mod analysis;
mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod extraction;
pub mod pipeline;
pub mod shared_data;
pub mod storage;
pub mod utils;

pub mod cli;

pub use config::{ApiKeys, LoggingConfig, MatchingConfig, ProviderConfig, Settings, StorageConfig};
pub use context::AppContext;

pub use analysis::{AnalysisResult, ConsensusAnalyzer};
pub use core::model::{ElementType, PageReference, ReferenceType, SharedDataElement};
pub use core::normalize::Contact;
pub use core::similarity::SimilarityScorer;
pub use shared_data::{ResolveOutcome, SharedDataManager};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fieldconsensus={}", logging.level)));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
