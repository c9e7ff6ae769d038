//! Merging fresh groupings into lineages that must survive reprocessing.
//!
//! Approved, lineaged versions and everything before them are preserved. The
//! rest of a site is regrouped from scratch and each new chain may be grafted
//! onto the tail of one preserved lineage, chosen by bipartite matching
//! between preserved tails and new heads.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use lineage_core::{analysis::AnalysisRecord, document::DocumentVersion};
use rustworkx_core::petgraph::{
  algo::maximum_matching,
  graph::{NodeIndex, UnGraph},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  config::GroupingConfig,
  grouper::{self, ProposedLineage},
  scorer::{MatchScorer, PairScorer},
  Error, Result,
};

/// A new chain attached after a preserved tail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Graft {
  pub old_lineage_id: Uuid,
  pub old_tail:       Uuid,
  /// Index into [`MergePlan::new_lineages`].
  pub new_lineage:    usize,
  pub confidence:     f64,
}

/// The last preserved member of a preserved lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreservedTail {
  pub lineage_id: Uuid,
  pub tail:       Uuid,
}

/// Everything a site's reprocessing will write, computed before any write.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergePlan {
  pub preserved:       BTreeSet<Uuid>,
  pub new_lineages:    Vec<ProposedLineage>,
  pub grafts:          Vec<Graft>,
  pub preserved_tails: Vec<PreservedTail>,
}

impl MergePlan {
  pub fn graft_for(&self, new_lineage: usize) -> Option<&Graft> {
    self.grafts.iter().find(|g| g.new_lineage == new_lineage)
  }

  pub fn is_grafted(&self, tail: Uuid) -> bool { self.grafts.iter().any(|g| g.old_tail == tail) }
}

/// Versions of `documents` linked to a version of `foreign`: their
/// predecessor is foreign, or a foreign version follows them.
pub fn anchored_ids(documents: &[DocumentVersion], foreign: &[DocumentVersion]) -> BTreeSet<Uuid> {
  let foreign_ids: HashSet<Uuid> = foreign.iter().map(|d| d.id).collect();
  let foreign_predecessors: HashSet<Uuid> =
    foreign.iter().filter_map(|d| d.previous_version_id).collect();
  documents
    .iter()
    .filter(|d| {
      d.previous_version_id.is_some_and(|p| foreign_ids.contains(&p))
        || foreign_predecessors.contains(&d.id)
    })
    .map(|d| d.id)
    .collect()
}

/// Approved lineaged versions, versions anchored to `foreign` members of
/// their lineages, and every transitive predecessor of either among
/// `documents`.
pub fn preserved_ids(
  documents: &[DocumentVersion],
  foreign: &[DocumentVersion],
) -> Result<BTreeSet<Uuid>> {
  let by_id: HashMap<Uuid, &DocumentVersion> = documents.iter().map(|d| (d.id, d)).collect();
  let anchored = anchored_ids(documents, foreign);
  let mut preserved = BTreeSet::new();

  for doc in documents.iter().filter(|d| d.is_frozen() || anchored.contains(&d.id)) {
    let mut walk = HashSet::new();
    let mut cursor = Some(doc);
    while let Some(current) = cursor {
      if !walk.insert(current.id) {
        return Err(Error::inconsistent(
          doc.lineage_id,
          format!("predecessor cycle through {}", current.id),
        ));
      }
      if !preserved.insert(current.id) {
        break;
      }
      cursor = current.previous_version_id.and_then(|p| by_id.get(&p).copied());
    }
  }
  Ok(preserved)
}

/// Plan a site's relineaging: regroup everything not preserved, then graft.
///
/// `foreign` holds the members of the site's lineages that live on other
/// sites. They are never rewritten, and nothing is grafted after a version
/// one of them follows.
pub fn plan_merge<M: MatchScorer>(
  documents: &[DocumentVersion],
  foreign: &[DocumentVersion],
  records: &[AnalysisRecord],
  scorer: &PairScorer<M>,
  config: &GroupingConfig,
) -> Result<MergePlan> {
  let preserved = preserved_ids(documents, foreign)?;
  let record_by_id: HashMap<Uuid, &AnalysisRecord> =
    records.iter().map(|r| (r.document_id, r)).collect();

  // ── Regroup ──────────────────────────────────────────────────────────────
  let mut to_relineage = Vec::new();
  let mut unanalysed = Vec::new();
  for doc in documents.iter().filter(|d| !preserved.contains(&d.id)) {
    match record_by_id.get(&doc.id) {
      Some(record) => to_relineage.push((*record).clone()),
      None => {
        tracing::warn!(document_id = %doc.id, "no analysis record, document kept on its own");
        unanalysed.push(doc);
      }
    }
  }
  let mut new_lineages = grouper::group(&to_relineage, scorer, config)?;
  unanalysed.sort_by_key(|d| d.chain_key());
  new_lineages.extend(
    unanalysed
      .into_iter()
      .map(|d| ProposedLineage::singleton(&AnalysisRecord::for_document(d))),
  );

  // ── Preserved tails ──────────────────────────────────────────────────────
  let preserved_tails = preserved_tails(documents, foreign, &preserved)?;

  // ── Bipartite matching ───────────────────────────────────────────────────
  let mut candidates = Vec::new();
  for (left, tail) in preserved_tails.iter().enumerate() {
    let Some(tail_record) = record_by_id.get(&tail.tail) else {
      tracing::debug!(tail = %tail.tail, "preserved tail has no analysis record, not grafting");
      continue;
    };
    for (right, lineage) in new_lineages.iter().enumerate() {
      if let Some(head_record) = record_by_id.get(&lineage.head()) {
        candidates.push((left, right, *tail_record, *head_record));
      }
    }
  }
  let pairs: Vec<_> = candidates.iter().map(|(_, _, t, h)| (*t, *h)).collect();
  let probabilities = scorer.score_pairs(&pairs)?;

  let left_count = preserved_tails.len();
  let mut graph: UnGraph<(), f64> = UnGraph::default();
  let nodes: Vec<NodeIndex> =
    (0..left_count + new_lineages.len()).map(|_| graph.add_node(())).collect();
  let mut scores = HashMap::new();
  for ((left, right, _, _), p) in candidates.iter().zip(probabilities) {
    if scorer.is_match(p) {
      graph.add_edge(nodes[*left], nodes[left_count + right], p);
      scores.insert((*left, *right), p);
    }
  }

  let matching = maximum_matching(&graph);
  let mut grafts: Vec<Graft> = matching
    .edges()
    .filter_map(|(a, b)| {
      let (l, r) = if a.index() < b.index() { (a.index(), b.index()) } else { (b.index(), a.index()) };
      let right = r.checked_sub(left_count)?;
      let tail = preserved_tails.get(l)?;
      Some(Graft {
        old_lineage_id: tail.lineage_id,
        old_tail:       tail.tail,
        new_lineage:    right,
        confidence:     scores.get(&(l, right)).copied().unwrap_or(0.0),
      })
    })
    .collect();
  grafts.sort_by_key(|g| g.new_lineage);

  tracing::debug!(
    preserved = preserved.len(),
    new_lineages = new_lineages.len(),
    grafts = grafts.len(),
    "planned merge"
  );
  Ok(MergePlan { preserved, new_lineages, grafts, preserved_tails })
}

/// One tail per preserved lineage: the preserved member followed by neither
/// a preserved nor a foreign version, latest chain key winning when a broken
/// chain yields several. A lineage whose end lives on another site has none.
fn preserved_tails(
  documents: &[DocumentVersion],
  foreign: &[DocumentVersion],
  preserved: &BTreeSet<Uuid>,
) -> Result<Vec<PreservedTail>> {
  let kept: Vec<&DocumentVersion> =
    documents.iter().filter(|d| preserved.contains(&d.id)).collect();
  let has_successor: HashSet<Uuid> = kept
    .iter()
    .copied()
    .chain(foreign)
    .filter_map(|d| d.previous_version_id)
    .collect();

  let mut by_lineage: BTreeMap<Uuid, Vec<&DocumentVersion>> = BTreeMap::new();
  for doc in &kept {
    let Some(lineage_id) = doc.lineage_id else {
      return Err(Error::inconsistent(
        None,
        format!("preserved predecessor {} has no lineage", doc.id),
      ));
    };
    if !has_successor.contains(&doc.id) {
      by_lineage.entry(lineage_id).or_default().push(doc);
    }
  }

  let mut tails = Vec::with_capacity(by_lineage.len());
  for (lineage_id, candidates) in by_lineage {
    if candidates.len() > 1 {
      tracing::warn!(%lineage_id, tails = candidates.len(), "preserved lineage has several tails");
    }
    if let Some(tail) = candidates.into_iter().max_by_key(|d| d.chain_key()) {
      tails.push(PreservedTail { lineage_id, tail: tail.id });
    }
  }
  Ok(tails)
}
