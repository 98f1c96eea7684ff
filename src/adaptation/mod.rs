//! Adaptation & Fossilization Engine
//!
//! Turns a learner's error history into prioritized patterns, escalation
//! tiers and selection weights, and keeps the intervention ledger that drives
//! escalation.

pub mod alerts;
pub mod engine;
pub mod profile;
pub mod tier;
pub mod trend;
pub mod weights;

pub use alerts::{build_fossilization_alerts, build_fossilization_alerts_at, render_alerts, FossilizationAlert};
pub use engine::AdaptationEngine;
pub use profile::{AdaptationPriority, AdaptationProfile};
pub use tier::{classify, PatternHistory};
pub use trend::{compute_trend, frequency};
pub use weights::{synthesize, ContentWeights};
