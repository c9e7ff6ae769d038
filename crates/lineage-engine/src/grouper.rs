//! From-scratch grouping of analysis records into proposed lineages.
//!
//! Records are partitioned by document type. Within a partition every pair is
//! scored, pairs above the threshold become undirected edges, and each
//! connected component is one lineage, laid out by chain key.

use std::collections::{BTreeMap, HashMap};

use lineage_core::{analysis::AnalysisRecord, document::ChainKey};
use rustworkx_core::{
  connectivity::connected_components,
  petgraph::graph::{NodeIndex, UnGraph},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  config::GroupingConfig,
  scorer::{MatchScorer, PairScorer, ScorerError},
};

/// One link of a proposed chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposedMember {
  pub document_id:         Uuid,
  pub previous_version_id: Option<Uuid>,
  /// Pairwise score against the predecessor; `None` on the head.
  pub confidence:          Option<f64>,
}

/// A freshly grouped chain, head first. Not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposedLineage {
  pub lineage_id:    Uuid,
  pub document_type: String,
  pub members:       Vec<ProposedMember>,
}

impl ProposedLineage {
  pub fn head(&self) -> Uuid { self.members[0].document_id }

  pub fn tail(&self) -> Uuid { self.members[self.members.len() - 1].document_id }

  pub fn len(&self) -> usize { self.members.len() }

  pub fn is_empty(&self) -> bool { self.members.is_empty() }

  /// A one-member lineage for `record`.
  pub fn singleton(record: &AnalysisRecord) -> Self {
    Self::from_chain(&[record], &HashMap::new())
  }

  /// Link `ordered` head first, taking each confidence from `scores`
  /// (keyed by `(predecessor, successor)` position).
  fn from_chain(ordered: &[&AnalysisRecord], scores: &HashMap<(Uuid, Uuid), f64>) -> Self {
    let mut members = Vec::with_capacity(ordered.len());
    let mut previous: Option<Uuid> = None;
    for record in ordered {
      let id = record.document_id;
      members.push(ProposedMember {
        document_id:         id,
        previous_version_id: previous,
        confidence:          previous.map(|p| pair_score(scores, p, id)),
      });
      previous = Some(id);
    }
    Self {
      lineage_id:    Uuid::new_v4(),
      document_type: ordered.first().map(|r| r.document_type.clone()).unwrap_or_default(),
      members,
    }
  }
}

fn pair_score(scores: &HashMap<(Uuid, Uuid), f64>, a: Uuid, b: Uuid) -> f64 {
  scores
    .get(&(a, b))
    .or_else(|| scores.get(&(b, a)))
    .copied()
    .unwrap_or(0.0)
}

/// Group `records` into lineages. Output is ordered by each head's chain key.
pub fn group<M: MatchScorer>(
  records: &[AnalysisRecord],
  scorer: &PairScorer<M>,
  config: &GroupingConfig,
) -> Result<Vec<ProposedLineage>, ScorerError> {
  let mut partitions: BTreeMap<&str, Vec<&AnalysisRecord>> = BTreeMap::new();
  for record in records {
    partitions.entry(record.document_type.as_str()).or_default().push(record);
  }

  let mut lineages: Vec<(ChainKey, ProposedLineage)> = Vec::new();
  for (document_type, mut members) in partitions {
    members.sort_by_key(|r| r.chain_key());

    if members.len() >= config.max_partition_size {
      tracing::warn!(
        document_type,
        size = members.len(),
        limit = config.max_partition_size,
        "partition too large to score, every record becomes its own lineage"
      );
      lineages.extend(members.iter().map(|r| (r.chain_key(), ProposedLineage::singleton(r))));
      continue;
    }

    lineages.extend(group_partition(&members, scorer)?);
  }

  lineages.sort_by_key(|(key, _)| *key);
  tracing::debug!(records = records.len(), lineages = lineages.len(), "grouped records");
  Ok(lineages.into_iter().map(|(_, lineage)| lineage).collect())
}

/// `members` must already be sorted by chain key.
fn group_partition<M: MatchScorer>(
  members: &[&AnalysisRecord],
  scorer: &PairScorer<M>,
) -> Result<Vec<(ChainKey, ProposedLineage)>, ScorerError> {
  let mut index_pairs = Vec::new();
  for i in 0..members.len() {
    for j in i + 1..members.len() {
      index_pairs.push((i, j));
    }
  }
  let record_pairs: Vec<_> = index_pairs.iter().map(|&(i, j)| (members[i], members[j])).collect();
  let probabilities = scorer.score_pairs(&record_pairs)?;

  let mut graph: UnGraph<usize, f64> = UnGraph::with_capacity(members.len(), 0);
  let nodes: Vec<NodeIndex> = (0..members.len()).map(|i| graph.add_node(i)).collect();
  let mut scores = HashMap::with_capacity(index_pairs.len());
  for (&(i, j), &p) in index_pairs.iter().zip(&probabilities) {
    scores.insert((members[i].document_id, members[j].document_id), p);
    if scorer.is_match(p) {
      graph.add_edge(nodes[i], nodes[j], p);
    }
  }

  let mut out = Vec::new();
  for component in connected_components(&graph) {
    let mut positions: Vec<usize> = component.iter().map(|n| graph[*n]).collect();
    positions.sort_unstable();
    let ordered: Vec<&AnalysisRecord> = positions.iter().map(|&i| members[i]).collect();
    let lineage = ProposedLineage::from_chain(&ordered, &scores);
    tracing::debug!(
      lineage_id = %lineage.lineage_id,
      members = lineage.len(),
      "proposed lineage"
    );
    out.push((ordered[0].chain_key(), lineage));
  }
  Ok(out)
}
