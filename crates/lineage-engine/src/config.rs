//! Engine tuning knobs.
//!
//! Passed explicitly into [`PairScorer`](crate::scorer::PairScorer) and the
//! grouper; nothing here is read from the environment directly. Feature
//! sentinels are fixed by the trained model and live as constants in
//! [`features`](crate::features).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub matching: MatchingConfig,
  pub grouping: GroupingConfig,
}

/// Pairwise scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
  /// A pair matches iff its probability is strictly greater than this.
  pub threshold:      f64,
  /// File-size and token-count ratios outside `[min, max]` are obvious
  /// mismatches.
  pub min_size_ratio: f64,
  pub max_size_ratio: f64,
  /// Pairs handed to the classifier per call.
  pub batch_size:     usize,
}

impl Default for MatchingConfig {
  fn default() -> Self {
    Self {
      threshold:      0.5,
      min_size_ratio: 0.5,
      max_size_ratio: 2.0,
      batch_size:     100,
    }
  }
}

/// From-scratch grouping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
  /// Partitions with at least this many records skip pairwise scoring and
  /// become singleton lineages.
  pub max_partition_size: usize,
}

impl Default for GroupingConfig {
  fn default() -> Self { Self { max_partition_size: 800 } }
}
