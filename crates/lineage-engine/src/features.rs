//! Pairwise feature extraction.
//!
//! [`FeatureExtractor::extract`] turns two analysis records into a
//! [`FeatureVector`] whose order is fixed by [`FeatureLayout`]. That order,
//! the keyword taxonomy and the sentinel constants below are a contract with
//! the trained classifier: changing any of them requires a retrained model.

use std::collections::BTreeSet;

use lineage_core::analysis::AnalysisRecord;

// ─── Sentinels ───────────────────────────────────────────────────────────────

/// Cosine similarity reported when either side has no usable embedding.
pub const MISSING_COSINE: f64 = 0.0;
/// Euclidean distance reported when either side has no usable embedding.
pub const MISSING_EUCLIDEAN: f64 = 100.0;
/// Effective-date gap (in years) reported when either date is unknown.
pub const MISSING_DATE_GAP: f64 = 100.0;

// ─── Text fields ─────────────────────────────────────────────────────────────

/// The text fields compared pairwise, in vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
  Name,
  LinkText,
  ElementText,
  ParentText,
  SiblingText,
  Filename,
  Pathname,
}

impl TextField {
  pub const ALL: [TextField; 7] = [
    Self::Name,
    Self::LinkText,
    Self::ElementText,
    Self::ParentText,
    Self::SiblingText,
    Self::Filename,
    Self::Pathname,
  ];

  pub fn label(self) -> &'static str {
    match self {
      Self::Name => "name",
      Self::LinkText => "link_text",
      Self::ElementText => "element_text",
      Self::ParentText => "parent_text",
      Self::SiblingText => "sibling_text",
      Self::Filename => "filename",
      Self::Pathname => "pathname",
    }
  }

  /// The field's value, or `None` when absent or blank.
  pub fn get(self, record: &AnalysisRecord) -> Option<&str> {
    let value = match self {
      Self::Name => &record.name,
      Self::LinkText => &record.link_text,
      Self::ElementText => &record.element_text,
      Self::ParentText => &record.parent_text,
      Self::SiblingText => &record.sibling_text,
      Self::Filename => &record.filename,
      Self::Pathname => &record.pathname,
    };
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
  }
}

// ─── Keyword taxonomy ────────────────────────────────────────────────────────

/// One presence flag: set when any of `terms` occurs as whole words.
pub struct KeywordGroup {
  pub label: &'static str,
  pub terms: &'static [&'static str],
}

/// Routes of administration, plan types, prior-auth abbreviations.
pub const KEYWORDS: &[KeywordGroup] = &[
  KeywordGroup { label: "oral",       terms: &["oral", "tablet", "tablets", "capsule", "capsules"] },
  KeywordGroup { label: "injectable", terms: &["injectable", "injectables", "injection", "injections", "subcutaneous", "intramuscular"] },
  KeywordGroup { label: "infusion",   terms: &["infusion", "infusions", "intravenous", "iv"] },
  KeywordGroup { label: "topical",    terms: &["topical", "cream", "ointment"] },
  KeywordGroup { label: "inhaled",    terms: &["inhaled", "inhalation", "inhaler"] },
  KeywordGroup { label: "ophthalmic", terms: &["ophthalmic", "eye drops"] },
  KeywordGroup { label: "commercial", terms: &["commercial", "employer group"] },
  KeywordGroup { label: "medicare",   terms: &["medicare", "part d", "mapd", "pdp"] },
  KeywordGroup { label: "medicaid",   terms: &["medicaid", "chip"] },
  KeywordGroup { label: "exchange",   terms: &["exchange", "marketplace", "aca", "individual and family"] },
  KeywordGroup { label: "pa",         terms: &["pa", "prior authorization", "prior auth", "preauthorization", "precertification"] },
  KeywordGroup { label: "st",         terms: &["st", "step therapy"] },
  KeywordGroup { label: "ql",         terms: &["ql", "quantity limit", "quantity limits"] },
];

// ─── Layout ──────────────────────────────────────────────────────────────────

/// The fixed order of every feature, shared with the Match Scorer.
pub struct FeatureLayout;

impl FeatureLayout {
  /// Entries contributed by one text field, present or not.
  pub fn text_field_width() -> usize { 2 + 2 * KEYWORDS.len() }

  pub fn width() -> usize { Self::names().len() }

  /// Feature names in vector order; model files are checked against these.
  pub fn names() -> Vec<String> {
    let mut names = Vec::new();
    for field in TextField::ALL {
      let f = field.label();
      names.push(format!("{f}.token_set"));
      names.push(format!("{f}.edit"));
      for side in ["left", "right"] {
        for group in KEYWORDS {
          names.push(format!("{f}.{side}.{}", group.label));
        }
      }
    }
    for tags in ["focus_tags", "reference_tags"] {
      names.push(format!("{tags}.left_len"));
      names.push(format!("{tags}.right_len"));
      names.push(format!("{tags}.jaccard"));
    }
    names.extend(
      [
        "embedding.cosine",
        "embedding.euclidean",
        "date.both_known",
        "date.same",
        "date.gap_years",
        "location.same_site",
        "location.same_directory",
        "size.file_ratio",
        "size.token_ratio",
      ]
      .map(String::from),
    );
    names
  }

  /// Index of a named feature, if it exists.
  pub fn index_of(name: &str) -> Option<usize> {
    Self::names().iter().position(|n| n == name)
  }
}

// ─── Vector ──────────────────────────────────────────────────────────────────

/// A fixed-width feature vector in [`FeatureLayout`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
  pub fn new(values: Vec<f64>) -> Self { Self(values) }

  pub fn values(&self) -> &[f64] { &self.0 }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn get(&self, index: usize) -> Option<f64> { self.0.get(index).copied() }
}

// ─── Extractor ───────────────────────────────────────────────────────────────

/// Stateless pairwise feature extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
  pub fn new() -> Self { Self }

  pub fn extract(&self, left: &AnalysisRecord, right: &AnalysisRecord) -> FeatureVector {
    let mut out = Vec::with_capacity(FeatureLayout::width());

    for field in TextField::ALL {
      push_text_field(&mut out, field.get(left), field.get(right));
    }

    for (l, r) in [
      (&left.focus_tags, &right.focus_tags),
      (&left.reference_tags, &right.reference_tags),
    ] {
      out.push(l.len() as f64);
      out.push(r.len() as f64);
      out.push(jaccard(l, r));
    }

    let (cosine, euclidean) = embedding_distances(
      left.embedding.as_deref(),
      right.embedding.as_deref(),
    );
    out.push(cosine);
    out.push(euclidean);

    match (left.effective_date, right.effective_date) {
      (Some(a), Some(b)) => {
        out.push(1.0);
        out.push(if a == b { 1.0 } else { 0.0 });
        out.push((a - b).num_days().abs() as f64 / 365.25);
      }
      _ => out.extend([0.0, 0.0, MISSING_DATE_GAP]),
    }

    out.push(flag(left.site_id == right.site_id));
    let same_dir = matches!(
      (directory(left.pathname.as_deref()), directory(right.pathname.as_deref())),
      (Some(a), Some(b)) if a == b
    );
    out.push(flag(same_dir));

    out.push(size_ratio(left.file_size, right.file_size).unwrap_or(0.0));
    out.push(size_ratio(left.token_count, right.token_count).unwrap_or(0.0));

    FeatureVector(out)
  }
}

fn push_text_field(out: &mut Vec<f64>, left: Option<&str>, right: Option<&str>) {
  let (Some(left), Some(right)) = (left, right) else {
    out.extend(std::iter::repeat_n(0.0, FeatureLayout::text_field_width()));
    return;
  };

  let left_norm  = normalize(left);
  let right_norm = normalize(right);
  out.push(token_set_similarity(&left_norm, &right_norm));
  out.push(strsim::normalized_levenshtein(
    &left.to_lowercase(),
    &right.to_lowercase(),
  ));
  for text in [&left_norm, &right_norm] {
    let padded = format!(" {text} ");
    for group in KEYWORDS {
      let hit = group
        .terms
        .iter()
        .any(|term| padded.contains(&format!(" {term} ")));
      out.push(flag(hit));
    }
  }
}

// ─── Similarity primitives ───────────────────────────────────────────────────

fn flag(b: bool) -> f64 { if b { 1.0 } else { 0.0 } }

/// Lowercase alphanumeric tokens joined by single spaces.
fn normalize(text: &str) -> String {
  text
    .to_lowercase()
    .split(|c: char| !c.is_alphanumeric())
    .filter(|t| !t.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}

/// Token-set ratio: compares the shared tokens against each side's shared +
/// leftover tokens, so reordering and one-sided additions cost little.
pub fn token_set_similarity(left: &str, right: &str) -> f64 {
  let a: BTreeSet<&str> = left.split(' ').filter(|t| !t.is_empty()).collect();
  let b: BTreeSet<&str> = right.split(' ').filter(|t| !t.is_empty()).collect();
  if a.is_empty() || b.is_empty() {
    return 0.0;
  }

  let join = |set: Vec<&str>| set.join(" ");
  let shared  = join(a.intersection(&b).copied().collect());
  let only_a  = join(a.difference(&b).copied().collect());
  let only_b  = join(b.difference(&a).copied().collect());
  let with_a  = format!("{shared} {only_a}").trim().to_string();
  let with_b  = format!("{shared} {only_b}").trim().to_string();

  let ratio = |x: &str, y: &str| {
    if x.is_empty() || y.is_empty() {
      0.0
    } else {
      strsim::normalized_levenshtein(x, y)
    }
  };
  ratio(&shared, &with_a)
    .max(ratio(&shared, &with_b))
    .max(ratio(&with_a, &with_b))
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
  let union = a.union(b).count();
  if union == 0 {
    return 0.0;
  }
  a.intersection(b).count() as f64 / union as f64
}

/// `(cosine similarity, euclidean distance)`, or the sentinels when either
/// side is missing, empty, mismatched in width or all zeros.
pub fn embedding_distances(a: Option<&[f32]>, b: Option<&[f32]>) -> (f64, f64) {
  let (Some(a), Some(b)) = (a, b) else {
    return (MISSING_COSINE, MISSING_EUCLIDEAN);
  };
  if a.is_empty() || a.len() != b.len() {
    return (MISSING_COSINE, MISSING_EUCLIDEAN);
  }

  let mut dot = 0.0_f64;
  let mut norm_a = 0.0_f64;
  let mut norm_b = 0.0_f64;
  let mut sq = 0.0_f64;
  for (&x, &y) in a.iter().zip(b) {
    let (x, y) = (f64::from(x), f64::from(y));
    dot += x * y;
    norm_a += x * x;
    norm_b += y * y;
    sq += (x - y) * (x - y);
  }
  if norm_a == 0.0 || norm_b == 0.0 {
    return (MISSING_COSINE, MISSING_EUCLIDEAN);
  }
  (dot / (norm_a.sqrt() * norm_b.sqrt()), sq.sqrt())
}

/// `min / max` of two known, non-zero sizes.
pub fn size_ratio(a: Option<u64>, b: Option<u64>) -> Option<f64> {
  let (a, b) = (a?, b?);
  let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
  if hi == 0 {
    return None;
  }
  Some(lo as f64 / hi as f64)
}

fn directory(path: Option<&str>) -> Option<&str> {
  path.and_then(|p| p.rsplit_once('/')).map(|(dir, _)| dir)
}
