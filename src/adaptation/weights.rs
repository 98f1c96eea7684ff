//! Weight Synthesizer
//!
//! Maps the learner's highest tier onto selection weights for passive content
//! and for active challenges. The random share is fixed at 0.20 everywhere;
//! escalation moves mass from unseen/weak toward fossilizing, harder for
//! challenges than for content.

use serde::{Deserialize, Serialize};

use crate::types::Tier;

/// Relative probability mass per selection strategy; sums to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentWeights {
    pub unseen: f64,
    pub weak: f64,
    pub fossilizing: f64,
    pub random: f64,
}

impl ContentWeights {
    const fn new(unseen: f64, weak: f64, fossilizing: f64, random: f64) -> Self {
        Self { unseen, weak, fossilizing, random }
    }

    pub fn total(&self) -> f64 {
        self.unseen + self.weak + self.fossilizing + self.random
    }
}

/// Exploration share at every tier
pub const RANDOM_WEIGHT: f64 = 0.20;

const CONTENT_DEFAULT: ContentWeights = ContentWeights::new(0.50, 0.30, 0.0, RANDOM_WEIGHT);
const CONTENT_NUDGE: ContentWeights = ContentWeights::new(0.40, 0.40, 0.0, RANDOM_WEIGHT);
const CONTENT_PUSH: ContentWeights = ContentWeights::new(0.40, 0.15, 0.25, RANDOM_WEIGHT);
const CONTENT_DESTABILIZE: ContentWeights = ContentWeights::new(0.30, 0.15, 0.35, RANDOM_WEIGHT);

const CHALLENGE_DEFAULT: ContentWeights = ContentWeights::new(0.40, 0.40, 0.0, RANDOM_WEIGHT);
const CHALLENGE_PUSH: ContentWeights = ContentWeights::new(0.30, 0.15, 0.35, RANDOM_WEIGHT);
const CHALLENGE_DESTABILIZE: ContentWeights = ContentWeights::new(0.20, 0.10, 0.50, RANDOM_WEIGHT);

/// (content, challenge) weights for the highest surfaced tier
pub fn synthesize(highest: Tier) -> (ContentWeights, ContentWeights) {
    match highest {
        Tier::None => (CONTENT_DEFAULT, CHALLENGE_DEFAULT),
        Tier::Nudge => (CONTENT_NUDGE, CHALLENGE_DEFAULT),
        Tier::Push => (CONTENT_PUSH, CHALLENGE_PUSH),
        Tier::Destabilize => (CONTENT_DESTABILIZE, CHALLENGE_DESTABILIZE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TIERS: [Tier; 4] = [Tier::None, Tier::Nudge, Tier::Push, Tier::Destabilize];

    #[test]
    fn test_weights_are_distributions() {
        for tier in ALL_TIERS {
            let (content, challenge) = synthesize(tier);
            for w in [content, challenge] {
                assert!((w.total() - 1.0).abs() < 1e-9, "tier {} sums to {}", tier, w.total());
                assert!(w.unseen >= 0.0 && w.weak >= 0.0 && w.fossilizing >= 0.0 && w.random >= 0.0);
            }
        }
    }

    #[test]
    fn test_random_share_fixed() {
        for tier in ALL_TIERS {
            let (content, challenge) = synthesize(tier);
            assert_eq!(content.random, 0.20);
            assert_eq!(challenge.random, 0.20);
        }
    }

    #[test]
    fn test_challenges_escalate_harder() {
        for tier in [Tier::Push, Tier::Destabilize] {
            let (content, challenge) = synthesize(tier);
            assert!(challenge.fossilizing > content.fossilizing);
        }
        let (content, _) = synthesize(Tier::None);
        assert_eq!(content.fossilizing, 0.0);
    }
}
