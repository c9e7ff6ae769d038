//! Lineages: the logical, never-stored grouping of versions by `lineage_id`.
//!
//! A lineage is read as a bag of rows and laid out into a chain here. Every
//! structural invariant is checked on the way; a violation is reported as
//! [`Error::InconsistentState`] and never repaired, since a silent fix would
//! hide whatever upstream defect produced it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, document::DocumentVersion};

/// Two consecutive members whose effective dates run backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateInversion {
  pub predecessor: Uuid,
  pub successor:   Uuid,
}

/// A verified lineage, ordered head first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lineage {
  pub lineage_id:      Uuid,
  pub chain:           Vec<DocumentVersion>,
  /// Effective-date order violations along the chain. Surfaced, not fixed.
  pub date_inversions: Vec<DateInversion>,
}

impl Lineage {
  /// Lay `members` out as a chain and verify it.
  ///
  /// The members must form a simple path under `previous_version_id` that
  /// stays inside the lineage, share one document type, and have exactly one
  /// current version, which must be the tail.
  pub fn from_members(lineage_id: Uuid, members: Vec<DocumentVersion>) -> Result<Self> {
    let Some(first) = members.first() else {
      return Err(Error::inconsistent(lineage_id, "lineage has no members"));
    };

    let document_type = first.document_type.clone();
    let mut by_id: HashMap<Uuid, DocumentVersion> = HashMap::with_capacity(members.len());
    for member in members {
      if member.lineage_id != Some(lineage_id) {
        return Err(Error::inconsistent(
          lineage_id,
          format!("member {} carries lineage {:?}", member.id, member.lineage_id),
        ));
      }
      if member.document_type != document_type {
        return Err(Error::inconsistent(
          lineage_id,
          format!(
            "member {} has document type {:?}, expected {:?}",
            member.id, member.document_type, document_type
          ),
        ));
      }
      by_id.insert(member.id, member);
    }

    let mut successor_of: HashMap<Uuid, Uuid> = HashMap::new();
    let mut heads = Vec::new();
    for member in by_id.values() {
      match member.previous_version_id {
        None => heads.push(member.id),
        Some(prev) if !by_id.contains_key(&prev) => {
          return Err(Error::inconsistent(
            lineage_id,
            format!("predecessor {prev} of {} lies outside the lineage", member.id),
          ));
        }
        Some(prev) => {
          if let Some(other) = successor_of.insert(prev, member.id) {
            return Err(Error::inconsistent(
              lineage_id,
              format!("{prev} has two successors: {other} and {}", member.id),
            ));
          }
        }
      }
    }

    let head = match heads.as_slice() {
      [head] => *head,
      [] => return Err(Error::inconsistent(lineage_id, "no chain head (cycle)")),
      many => {
        return Err(Error::inconsistent(
          lineage_id,
          format!("{} chain heads", many.len()),
        ));
      }
    };

    let currents = by_id.values().filter(|d| d.is_current_version).count();
    if currents != 1 {
      return Err(Error::inconsistent(
        lineage_id,
        format!("{currents} current versions"),
      ));
    }

    let mut chain = Vec::with_capacity(by_id.len());
    let mut cursor = Some(head);
    while let Some(id) = cursor {
      let Some(member) = by_id.remove(&id) else {
        return Err(Error::inconsistent(lineage_id, format!("cycle through {id}")));
      };
      cursor = successor_of.get(&id).copied();
      chain.push(member);
    }
    if !by_id.is_empty() {
      return Err(Error::inconsistent(
        lineage_id,
        format!("{} members unreachable from the head", by_id.len()),
      ));
    }

    if let Some(tail) = chain.last()
      && !tail.is_current_version
    {
      return Err(Error::inconsistent(
        lineage_id,
        format!("tail {} is not the current version", tail.id),
      ));
    }

    let date_inversions: Vec<DateInversion> = chain
      .windows(2)
      .filter_map(|pair| match (pair[0].effective_date, pair[1].effective_date) {
        (Some(a), Some(b)) if b < a => Some(DateInversion {
          predecessor: pair[0].id,
          successor:   pair[1].id,
        }),
        _ => None,
      })
      .collect();
    for inversion in &date_inversions {
      tracing::warn!(
        %lineage_id,
        predecessor = %inversion.predecessor,
        successor = %inversion.successor,
        "effective dates run backwards along lineage"
      );
    }

    Ok(Self { lineage_id, chain, date_inversions })
  }

  pub fn head(&self) -> &DocumentVersion { &self.chain[0] }

  pub fn current(&self) -> &DocumentVersion { &self.chain[self.chain.len() - 1] }

  pub fn len(&self) -> usize { self.chain.len() }

  pub fn is_empty(&self) -> bool { self.chain.is_empty() }

  /// Member ids, head first.
  pub fn ids(&self) -> Vec<Uuid> { self.chain.iter().map(|d| d.id).collect() }
}
