//! Match scoring: the pretrained pairwise classifier and the pre-filter in
//! front of it.
//!
//! [`MatchScorer`] is the seam: it maps a [`FeatureVector`] to a same-document
//! probability. [`PairScorer`] owns extraction, the obvious-mismatch
//! pre-filter and batching, so grouping and merging only ever ask it about
//! pairs of records.

use std::path::{Path, PathBuf};

use lineage_core::analysis::AnalysisRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  config::MatchingConfig,
  features::{FeatureExtractor, FeatureLayout, FeatureVector},
};

#[derive(Debug, Error)]
pub enum ScorerError {
  #[error("cannot read model file {path}: {source}")]
  Io {
    path:   PathBuf,
    source: std::io::Error,
  },

  #[error("malformed model: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("model was trained on a different feature layout: {0}")]
  LayoutMismatch(String),

  #[error("feature vector has {found} entries, model expects {expected}")]
  WidthMismatch { expected: usize, found: usize },

  #[error("model produced a non-finite probability")]
  NonFinite,

  #[error("model produced probability {0} outside [0, 1]")]
  OutOfRange(f64),

  #[error("scorer returned {found} probabilities for {expected} pairs")]
  BatchLength { expected: usize, found: usize },

  #[error("{0}")]
  Unavailable(String),
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// A pairwise classifier over [`FeatureLayout`]-ordered vectors.
pub trait MatchScorer: Send + Sync {
  /// Probability in `[0, 1]` that both sides are versions of one document.
  fn score(&self, features: &FeatureVector) -> Result<f64, ScorerError>;

  /// Score several vectors at once; any failure voids the whole batch.
  fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, ScorerError> {
    batch.iter().map(|f| self.score(f)).collect()
  }
}

impl<T: MatchScorer + ?Sized> MatchScorer for Box<T> {
  fn score(&self, features: &FeatureVector) -> Result<f64, ScorerError> {
    (**self).score(features)
  }

  fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, ScorerError> {
    (**self).score_batch(batch)
  }
}

// ─── Logistic model ──────────────────────────────────────────────────────────

/// A trained linear classifier, serialised as
/// `{"feature_names": [...], "weights": [...], "bias": 0.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
  pub feature_names: Vec<String>,
  pub weights:       Vec<f64>,
  pub bias:          f64,
}

impl LogisticModel {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ScorerError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ScorerError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let model = Self::from_json(&json)?;
    tracing::info!(path = %path.display(), features = model.weights.len(), "loaded match model");
    Ok(model)
  }

  pub fn from_json(json: &str) -> Result<Self, ScorerError> {
    let model: Self = serde_json::from_str(json)?;
    model.validate()?;
    Ok(model)
  }

  /// Check the model against the extractor's layout.
  pub fn validate(&self) -> Result<(), ScorerError> {
    let expected = FeatureLayout::names();
    if self.weights.len() != self.feature_names.len() {
      return Err(ScorerError::LayoutMismatch(format!(
        "{} weights for {} feature names",
        self.weights.len(),
        self.feature_names.len()
      )));
    }
    if self.feature_names != expected {
      let first_difference = expected
        .iter()
        .zip(&self.feature_names)
        .position(|(a, b)| a != b)
        .unwrap_or(expected.len().min(self.feature_names.len()));
      return Err(ScorerError::LayoutMismatch(format!(
        "{} features, expected {}; first difference at index {first_difference}",
        self.feature_names.len(),
        expected.len()
      )));
    }
    if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
      return Err(ScorerError::LayoutMismatch("non-finite coefficient".into()));
    }
    Ok(())
  }
}

impl MatchScorer for LogisticModel {
  fn score(&self, features: &FeatureVector) -> Result<f64, ScorerError> {
    if features.len() != self.weights.len() {
      return Err(ScorerError::WidthMismatch {
        expected: self.weights.len(),
        found:    features.len(),
      });
    }
    let z: f64 = self.bias
      + self
        .weights
        .iter()
        .zip(features.values())
        .map(|(w, x)| w * x)
        .sum::<f64>();
    let p = 1.0 / (1.0 + (-z).exp());
    if !p.is_finite() {
      return Err(ScorerError::NonFinite);
    }
    Ok(p)
  }
}

// ─── Heuristic stub ──────────────────────────────────────────────────────────

/// Rules-based fallback used when no trained model is configured.
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
  terms: Vec<(usize, f64)>,
}

const HEURISTIC_TERMS: &[(&str, f64)] = &[
  ("name.token_set", 0.35),
  ("filename.edit", 0.20),
  ("focus_tags.jaccard", 0.20),
  ("embedding.cosine", 0.25),
];

impl HeuristicScorer {
  pub fn new() -> Self {
    let names = FeatureLayout::names();
    let terms = HEURISTIC_TERMS
      .iter()
      .filter_map(|(name, weight)| {
        names.iter().position(|n| n == name).map(|i| (i, *weight))
      })
      .collect();
    Self { terms }
  }
}

impl Default for HeuristicScorer {
  fn default() -> Self { Self::new() }
}

impl MatchScorer for HeuristicScorer {
  fn score(&self, features: &FeatureVector) -> Result<f64, ScorerError> {
    let mut p = 0.0;
    for &(index, weight) in &self.terms {
      let value = features.get(index).ok_or(ScorerError::WidthMismatch {
        expected: FeatureLayout::width(),
        found:    features.len(),
      })?;
      p += weight * value.clamp(0.0, 1.0);
    }
    Ok(p)
  }
}

// ─── Pair scorer ─────────────────────────────────────────────────────────────

/// Extraction, pre-filter and batching around a [`MatchScorer`].
pub struct PairScorer<M> {
  extractor: FeatureExtractor,
  model:     M,
  config:    MatchingConfig,
}

impl<M: MatchScorer> PairScorer<M> {
  pub fn new(model: M, config: MatchingConfig) -> Self {
    Self { extractor: FeatureExtractor::new(), model, config }
  }

  pub fn threshold(&self) -> f64 { self.config.threshold }

  pub fn config(&self) -> &MatchingConfig { &self.config }

  /// Whether a probability counts as a match. Strictly greater than the
  /// threshold.
  pub fn is_match(&self, probability: f64) -> bool { probability > self.config.threshold }

  /// Cheap structural rejection; a rejected pair scores 0 without ever
  /// reaching the classifier.
  pub fn is_obvious_mismatch(&self, left: &AnalysisRecord, right: &AnalysisRecord) -> bool {
    if left.document_type != right.document_type {
      return true;
    }
    let out_of_range = |a: Option<u64>, b: Option<u64>| match (a, b) {
      (Some(a), Some(b)) if a > 0 && b > 0 => {
        let ratio = a as f64 / b as f64;
        ratio < self.config.min_size_ratio || ratio > self.config.max_size_ratio
      }
      (Some(a), Some(b)) => a != b,
      _ => false,
    };
    out_of_range(left.file_size, right.file_size)
      || out_of_range(left.token_count, right.token_count)
  }

  pub fn score_pair(
    &self,
    left: &AnalysisRecord,
    right: &AnalysisRecord,
  ) -> Result<f64, ScorerError> {
    Ok(self.score_pairs(&[(left, right)])?[0])
  }

  /// Score `pairs` in order, in batches of `batch_size`.
  pub fn score_pairs(
    &self,
    pairs: &[(&AnalysisRecord, &AnalysisRecord)],
  ) -> Result<Vec<f64>, ScorerError> {
    let mut scores = vec![0.0; pairs.len()];
    let candidates: Vec<usize> = (0..pairs.len())
      .filter(|&i| !self.is_obvious_mismatch(pairs[i].0, pairs[i].1))
      .collect();

    for chunk in candidates.chunks(self.config.batch_size.max(1)) {
      let batch: Vec<FeatureVector> = chunk
        .iter()
        .map(|&i| self.extractor.extract(pairs[i].0, pairs[i].1))
        .collect();
      let probabilities = self.model.score_batch(&batch)?;
      if probabilities.len() != chunk.len() {
        return Err(ScorerError::BatchLength {
          expected: chunk.len(),
          found:    probabilities.len(),
        });
      }
      for (&i, p) in chunk.iter().zip(probabilities) {
        if !p.is_finite() {
          return Err(ScorerError::NonFinite);
        }
        if !(0.0..=1.0).contains(&p) {
          return Err(ScorerError::OutOfRange(p));
        }
        scores[i] = p;
      }
    }

    tracing::debug!(
      pairs = pairs.len(),
      scored = candidates.len(),
      "scored candidate pairs"
    );
    Ok(scores)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  };

  use uuid::Uuid;

  use super::*;

  fn record(document_type: &str) -> AnalysisRecord {
    AnalysisRecord {
      document_id: Uuid::new_v4(),
      document_type: document_type.into(),
      ..AnalysisRecord::default()
    }
  }

  fn zero_model() -> LogisticModel {
    let names = FeatureLayout::names();
    LogisticModel { weights: vec![0.0; names.len()], feature_names: names, bias: 0.0 }
  }

  /// Always 1.0, recording every batch size it sees.
  #[derive(Default)]
  struct Recording {
    calls:   AtomicUsize,
    batches: Mutex<Vec<usize>>,
  }

  impl MatchScorer for Recording {
    fn score(&self, _: &FeatureVector) -> Result<f64, ScorerError> { Ok(1.0) }

    fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, ScorerError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.batches.lock().unwrap().push(batch.len());
      Ok(vec![1.0; batch.len()])
    }
  }

  // ── Model loading ────────────────────────────────────────────────────────

  #[test]
  fn zero_weight_model_is_undecided() {
    let model = zero_model();
    let v = FeatureExtractor::new().extract(&record("formulary"), &record("formulary"));
    assert_eq!(model.score(&v).unwrap(), 0.5);
  }

  #[test]
  fn model_json_roundtrip_validates() {
    let json = serde_json::to_string(&zero_model()).unwrap();
    assert_eq!(LogisticModel::from_json(&json).unwrap(), zero_model());
  }

  #[test]
  fn malformed_model_is_rejected() {
    let err = LogisticModel::from_json("{\"weights\": [1.0]}").unwrap_err();
    assert!(matches!(err, ScorerError::Parse(_)));
  }

  #[test]
  fn model_for_other_layout_is_rejected() {
    let mut model = zero_model();
    model.feature_names.swap(0, 1);
    let json = serde_json::to_string(&model).unwrap();
    let err = LogisticModel::from_json(&json).unwrap_err();
    assert!(matches!(err, ScorerError::LayoutMismatch(_)));

    let mut short = zero_model();
    short.weights.pop();
    let err = short.validate().unwrap_err();
    assert!(matches!(err, ScorerError::LayoutMismatch(_)));
  }

  #[test]
  fn missing_model_file_is_io_error() {
    let err = LogisticModel::load("/nonexistent/lineage-model.json").unwrap_err();
    assert!(matches!(err, ScorerError::Io { .. }));
    let engine_err: crate::Error = err.into();
    assert!(matches!(engine_err, crate::Error::ScorerUnavailable(_)));
  }

  #[test]
  fn narrow_vector_is_width_mismatch() {
    let err = zero_model().score(&FeatureVector::new(vec![0.0; 3])).unwrap_err();
    assert!(matches!(err, ScorerError::WidthMismatch { found: 3, .. }));
  }

  #[test]
  fn heuristic_scores_identical_names_higher() {
    let mut a = record("formulary");
    a.name = Some("Medicare Part D Formulary".into());
    let mut b = record("formulary");
    b.name = Some("Medicare Part D Formulary".into());
    let mut c = record("formulary");
    c.name = Some("Dental Fee Schedule".into());

    let extractor = FeatureExtractor::new();
    let scorer = HeuristicScorer::new();
    let same = scorer.score(&extractor.extract(&a, &b)).unwrap();
    let diff = scorer.score(&extractor.extract(&a, &c)).unwrap();
    assert!(same > diff);
    assert!((0.0..=1.0).contains(&same));
  }

  // ── Pre-filter ───────────────────────────────────────────────────────────

  #[test]
  fn differing_type_is_obvious_mismatch() {
    let scorer = PairScorer::new(Recording::default(), MatchingConfig::default());
    assert!(scorer.is_obvious_mismatch(&record("formulary"), &record("policy")));
    assert!(!scorer.is_obvious_mismatch(&record("formulary"), &record("formulary")));
  }

  #[test]
  fn size_ratios_outside_band_are_obvious_mismatch() {
    let scorer = PairScorer::new(Recording::default(), MatchingConfig::default());
    let mut a = record("formulary");
    let mut b = record("formulary");

    a.file_size = Some(100);
    b.file_size = Some(250);
    assert!(scorer.is_obvious_mismatch(&a, &b));

    b.file_size = Some(200);
    assert!(!scorer.is_obvious_mismatch(&a, &b));

    a.token_count = Some(1_000);
    b.token_count = Some(400);
    assert!(scorer.is_obvious_mismatch(&a, &b));

    b.token_count = None;
    assert!(!scorer.is_obvious_mismatch(&a, &b));
  }

  #[test]
  fn prefiltered_pairs_never_reach_the_model() {
    let scorer = PairScorer::new(Recording::default(), MatchingConfig::default());
    let a = record("formulary");
    let b = record("policy");
    let scores = scorer.score_pairs(&[(&a, &b)]).unwrap();
    assert_eq!(scores, vec![0.0]);
    assert_eq!(scorer.model.calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn pairs_are_scored_in_fixed_batches() {
    let config = MatchingConfig { batch_size: 2, ..MatchingConfig::default() };
    let scorer = PairScorer::new(Recording::default(), config);
    let records: Vec<AnalysisRecord> = (0..6).map(|_| record("formulary")).collect();
    let pairs: Vec<_> = records.windows(2).map(|w| (&w[0], &w[1])).collect();

    let scores = scorer.score_pairs(&pairs).unwrap();
    assert_eq!(scores, vec![1.0; 5]);
    assert_eq!(*scorer.model.batches.lock().unwrap(), vec![2, 2, 1]);
  }

  #[test]
  fn match_is_strictly_above_threshold() {
    let scorer = PairScorer::new(Recording::default(), MatchingConfig::default());
    assert!(!scorer.is_match(0.5));
    assert!(scorer.is_match(0.500_001));
  }

  #[test]
  fn scorer_failure_voids_the_batch() {
    struct Broken;
    impl MatchScorer for Broken {
      fn score(&self, _: &FeatureVector) -> Result<f64, ScorerError> {
        Err(ScorerError::Unavailable("model offline".into()))
      }
    }

    let scorer = PairScorer::new(Broken, MatchingConfig::default());
    let a = record("formulary");
    let b = record("formulary");
    assert!(scorer.score_pairs(&[(&a, &b)]).is_err());
  }

  #[test]
  fn probabilities_outside_unit_interval_are_rejected() {
    struct Fixed(f64);
    impl MatchScorer for Fixed {
      fn score(&self, _: &FeatureVector) -> Result<f64, ScorerError> { Ok(self.0) }
    }

    let a = record("formulary");
    let b = record("formulary");
    for p in [1.3, -0.2] {
      let scorer = PairScorer::new(Fixed(p), MatchingConfig::default());
      let err = scorer.score_pairs(&[(&a, &b)]).unwrap_err();
      assert!(matches!(err, ScorerError::OutOfRange(found) if found == p));
    }
    for p in [0.0, 1.0] {
      let scorer = PairScorer::new(Fixed(p), MatchingConfig::default());
      assert_eq!(scorer.score_pairs(&[(&a, &b)]).unwrap(), vec![p]);
    }
  }
}
