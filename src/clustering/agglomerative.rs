//! Average-linkage agglomerative clustering over cosine similarity
//!
//! Starts from singletons and repeatedly merges the pair of clusters with the
//! highest mean cross-member similarity, stopping once that best similarity
//! falls below the threshold. The number of clusters is never fixed up front.

use std::time::{Duration, Instant};

use crate::embeddings::cosine_similarity;
use crate::error::{EngineError, EngineResult};

/// Wall-clock limit for the CPU-bound passes, checked between rows and merges
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
            budget,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            at: None,
            budget: Duration::MAX,
        }
    }

    pub fn check(&self) -> EngineResult<()> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(EngineError::EmbeddingTimeout(self.budget)),
            _ => Ok(()),
        }
    }
}

/// Pairwise cosine similarity matrix (symmetric, diagonal 1.0)
pub fn similarity_matrix(vectors: &[Vec<f32>], deadline: &Deadline) -> EngineResult<Vec<Vec<f32>>> {
    let n = vectors.len();
    let mut sim = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        deadline.check()?;
        sim[i][i] = 1.0;
        for j in (i + 1)..n {
            let s = cosine_similarity(&vectors[i], &vectors[j]);
            sim[i][j] = s;
            sim[j][i] = s;
        }
    }
    Ok(sim)
}

/// Cluster `vectors`, returning groups of indices.
///
/// Groups are ordered by their smallest member index and members within a
/// group are ascending. Fails with a timeout once `deadline` passes.
pub fn average_linkage(vectors: &[Vec<f32>], threshold: f32, deadline: &Deadline) -> EngineResult<Vec<Vec<usize>>> {
    let n = vectors.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    // Row i holds the average linkage between active cluster i and every other cluster
    let mut linkage = similarity_matrix(vectors, deadline)?;
    let mut clusters: Vec<Option<Vec<usize>>> = (0..n).map(|i| Some(vec![i])).collect();

    loop {
        deadline.check()?;

        let mut best: Option<(usize, usize, f32)> = None;
        for i in 0..n {
            if clusters[i].is_none() {
                continue;
            }
            for j in (i + 1)..n {
                if clusters[j].is_none() {
                    continue;
                }
                let s = linkage[i][j];
                if best.map_or(true, |(_, _, b)| s > b) {
                    best = Some((i, j, s));
                }
            }
        }

        let (keep, absorb) = match best {
            Some((i, j, s)) if s >= threshold => (i, j),
            _ => break,
        };

        let absorbed = clusters[absorb].take().unwrap_or_default();
        let size_keep = clusters[keep].as_ref().map_or(0, |c| c.len()) as f32;
        let size_absorb = absorbed.len() as f32;

        // Lance-Williams update for average linkage
        for k in 0..n {
            if k == keep || clusters[k].is_none() {
                continue;
            }
            let merged = (size_keep * linkage[keep][k] + size_absorb * linkage[absorb][k])
                / (size_keep + size_absorb);
            linkage[keep][k] = merged;
            linkage[k][keep] = merged;
        }

        if let Some(target) = clusters[keep].as_mut() {
            target.extend(absorbed);
            target.sort_unstable();
        }
    }

    Ok(clusters.into_iter().flatten().collect())
}

/// Mean pairwise similarity among `members`; 1.0 for a singleton
pub fn cohesion(vectors: &[Vec<f32>], members: &[usize]) -> f32 {
    if members.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0f64;
    let mut pairs = 0usize;
    for (a, &i) in members.iter().enumerate() {
        for &j in &members[a + 1..] {
            total += cosine_similarity(&vectors[i], &vectors[j]) as f64;
            pairs += 1;
        }
    }
    (total / pairs as f64) as f32
}
