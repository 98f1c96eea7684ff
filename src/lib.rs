//! Adaptation Engine - fossilization-aware targeting for language learners
//!
//! - Clusters a learner's error events into patterns (semantic, with an
//!   exact-match fallback)
//! - Tracks frequency and week-over-week trend per pattern
//! - Escalates persistent patterns through nudge / push / destabilize tiers
//!   based on an append-only intervention ledger
//! - Synthesizes selection weights for content and challenge pickers
//!
//! # Example
//!
//! ```ignore
//! use adaptation_engine::{AdaptationEngine, Config, InterventionSource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = AdaptationEngine::from_config(Config::load()?).await?;
//!     let profile = engine.get_adaptation_profile("learner-1").await?;
//!     if let Some(top) = profile.priorities.first() {
//!         engine.record_intervention("learner-1", top, InterventionSource::ContentSelection).await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod embeddings;
pub mod clustering;
pub mod store;
pub mod ledger;
pub mod adaptation;
pub mod cli;

pub use adaptation::{
    build_fossilization_alerts,
    render_alerts,
    AdaptationEngine,
    AdaptationPriority,
    AdaptationProfile,
    ContentWeights,
    FossilizationAlert,
};

pub use clustering::{ClusteringMode, ErrorCluster, ErrorClusterer};
pub use config::Config;
pub use embeddings::EmbeddingProvider;
pub use error::{EngineError, EngineResult};
pub use ledger::{InterventionRecord, InterventionSource};
pub use store::{AdaptationStore, SqliteStore};
pub use types::{ErrorEvent, ErrorType, Modality, Tier, Trend};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

pub fn info() -> String {
    format!("{} v{}", NAME, VERSION)
}
