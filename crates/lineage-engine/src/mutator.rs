//! Manual chain surgery.
//!
//! [`ChainMutator`] moves a version, optionally with every later version of
//! its chain, into a brand-new lineage or after another version. Every
//! precondition is checked before the first write; writes then go one record
//! at a time, and each affected lineage is re-read and verified at the end.

use std::{
  collections::{BTreeSet, HashSet},
  sync::Arc,
};

use lineage_core::{
  document::{DocumentVersion, LineageUpdate},
  lineage::Lineage,
  store::DocumentStore,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{Error, Result};

/// Confidence recorded on edges created by hand.
pub const MANUAL_CONFIDENCE: f64 = 1.0;

/// Outcome of one manual operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Mutation {
  /// Lineage the document belongs to afterwards; `None` for a no-op.
  pub lineage_id: Option<Uuid>,
  /// Versions that changed lineage or position, in write order.
  pub moved:      Vec<Uuid>,
  /// Every lineage touched, re-read and verified.
  pub lineages:   Vec<Lineage>,
}

pub struct ChainMutator<S> {
  store: Arc<S>,
}

impl<S: DocumentStore> ChainMutator<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Detach `document_id` from `old_predecessor` into a fresh lineage,
  /// carrying its later versions along when `include_later` is set.
  pub async fn start_new_lineage(
    &self,
    document_id: Uuid,
    old_predecessor: Option<Uuid>,
    include_later: bool,
  ) -> Result<Mutation> {
    let doc = self.load(document_id).await?;
    check_predecessor(&doc, old_predecessor)?;
    let old_pred = self.load_opt(old_predecessor).await?;
    let (carried, after) = self.detach(&doc, include_later).await?;

    let lineage_id = Uuid::new_v4();
    self.close_gap(old_pred.as_ref(), after.as_ref()).await?;

    let last = carried.len() - 1;
    for (i, member) in carried.iter().enumerate() {
      let mut update = LineageUpdate::new()
        .lineage(Some(lineage_id))
        .current(i == last);
      if i == 0 {
        update = update.previous(None).confidence(None);
      }
      self.write(member.id, update).await?;
    }

    tracing::info!(
      document_id = %doc.id,
      %lineage_id,
      moved = carried.len(),
      "started new lineage"
    );
    let lineages = self.verify([doc.lineage_id, Some(lineage_id)]).await?;
    Ok(Mutation {
      lineage_id: Some(lineage_id),
      moved: carried.iter().map(|d| d.id).collect(),
      lineages,
    })
  }

  /// Move `document_id` from after `old_predecessor` to after
  /// `new_predecessor`, carrying its later versions along when
  /// `include_later` is set.
  pub async fn update_lineage(
    &self,
    document_id: Uuid,
    old_predecessor: Option<Uuid>,
    new_predecessor: Option<Uuid>,
    include_later: bool,
  ) -> Result<Mutation> {
    if old_predecessor == new_predecessor {
      tracing::debug!(%document_id, "predecessor unchanged, nothing to do");
      return Ok(Mutation::default());
    }
    let Some(new_predecessor) = new_predecessor else {
      return self.start_new_lineage(document_id, old_predecessor, include_later).await;
    };

    let doc = self.load(document_id).await?;
    check_predecessor(&doc, old_predecessor)?;
    let old_pred = self.load_opt(old_predecessor).await?;
    let new_pred = self.load(new_predecessor).await?;

    if new_pred.id == doc.id {
      return Err(Error::WouldCreateCycle { document: doc.id, new_predecessor });
    }
    if new_pred.document_type != doc.document_type {
      return Err(Error::DocumentTypeMismatch {
        document: doc.id,
        expected: new_pred.document_type,
        found:    doc.document_type,
      });
    }
    let Some(target) = new_pred.lineage_id else {
      return Err(Error::inconsistent(
        None,
        format!("new predecessor {} belongs to no lineage", new_pred.id),
      ));
    };

    let (carried, after) = self.detach(&doc, include_later).await?;
    if carried.iter().any(|d| d.id == new_pred.id) {
      return Err(Error::WouldCreateCycle { document: doc.id, new_predecessor });
    }
    let displaced = self.successor(&new_pred).await?;

    // ── Source side ────────────────────────────────────────────────────────
    self.close_gap(old_pred.as_ref(), after.as_ref()).await?;

    // ── Destination side ───────────────────────────────────────────────────
    let last = carried.len() - 1;
    for (i, member) in carried.iter().enumerate() {
      let mut update = LineageUpdate::new()
        .lineage(Some(target))
        .current(i == last && displaced.is_none());
      if i == 0 {
        update = update
          .previous(Some(new_pred.id))
          .confidence(Some(MANUAL_CONFIDENCE));
      }
      self.write(member.id, update).await?;
    }
    match &displaced {
      Some(next) => {
        let update = LineageUpdate::new()
          .previous(Some(carried[last].id))
          .confidence(Some(MANUAL_CONFIDENCE));
        self.write(next.id, update).await?;
      }
      None => {
        self.write(new_pred.id, LineageUpdate::new().current(false)).await?;
      }
    }

    tracing::info!(
      document_id = %doc.id,
      new_predecessor = %new_pred.id,
      lineage_id = %target,
      moved = carried.len(),
      spliced = displaced.is_some(),
      "moved versions into lineage"
    );
    let lineages = self.verify([doc.lineage_id, Some(target)]).await?;
    Ok(Mutation {
      lineage_id: Some(target),
      moved: carried.iter().map(|d| d.id).collect(),
      lineages,
    })
  }

  // ── Helpers ───────────────────────────────────────────────────────────────

  async fn load(&self, id: Uuid) -> Result<DocumentVersion> {
    self
      .store
      .get_document(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound(id))
  }

  async fn load_opt(&self, id: Option<Uuid>) -> Result<Option<DocumentVersion>> {
    match id {
      Some(id) => Ok(Some(self.load(id).await?)),
      None => Ok(None),
    }
  }

  async fn write(&self, id: Uuid, update: LineageUpdate) -> Result<DocumentVersion> {
    self
      .store
      .update_document(id, update)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound(id))
  }

  /// The single version following `doc`; two or more is a branch.
  async fn successor(&self, doc: &DocumentVersion) -> Result<Option<DocumentVersion>> {
    let mut successors = self.store.find_successors(doc.id).await.map_err(Error::store)?;
    if successors.len() > 1 {
      return Err(Error::inconsistent(
        doc.lineage_id,
        format!("{} has {} successors", doc.id, successors.len()),
      ));
    }
    Ok(successors.pop())
  }

  /// The versions that move (head first) and the version left behind
  /// right after them, if any.
  async fn detach(
    &self,
    doc: &DocumentVersion,
    include_later: bool,
  ) -> Result<(Vec<DocumentVersion>, Option<DocumentVersion>)> {
    let mut carried = vec![doc.clone()];
    let mut next = self.successor(doc).await?;
    if !include_later {
      return Ok((carried, next));
    }

    let mut seen = HashSet::from([doc.id]);
    while let Some(member) = next {
      if !seen.insert(member.id) {
        return Err(Error::inconsistent(
          doc.lineage_id,
          format!("successor cycle through {}", member.id),
        ));
      }
      next = self.successor(&member).await?;
      carried.push(member);
    }
    Ok((carried, None))
  }

  /// Repair the chain the moved versions leave: the version after them
  /// relinks to `old_pred`, or `old_pred` becomes the tail.
  async fn close_gap(
    &self,
    old_pred: Option<&DocumentVersion>,
    after: Option<&DocumentVersion>,
  ) -> Result<()> {
    match (after, old_pred) {
      (Some(next), _) => {
        let previous = old_pred.map(|p| p.id);
        let update = LineageUpdate::new()
          .previous(previous)
          .confidence(previous.map(|_| MANUAL_CONFIDENCE));
        self.write(next.id, update).await?;
      }
      (None, Some(pred)) => {
        self.write(pred.id, LineageUpdate::new().current(true)).await?;
      }
      (None, None) => {}
    }
    Ok(())
  }

  /// Re-read and verify each lineage; emptied lineages are skipped.
  async fn verify(
    &self,
    lineage_ids: impl IntoIterator<Item = Option<Uuid>>,
  ) -> Result<Vec<Lineage>> {
    let ids: BTreeSet<Uuid> = lineage_ids.into_iter().flatten().collect();
    let mut verified = Vec::with_capacity(ids.len());
    for lineage_id in ids {
      let members = self.store.list_lineage(lineage_id).await.map_err(Error::store)?;
      if members.is_empty() {
        continue;
      }
      verified.push(Lineage::from_members(lineage_id, members)?);
    }
    Ok(verified)
  }
}

fn check_predecessor(doc: &DocumentVersion, claimed: Option<Uuid>) -> Result<()> {
  if doc.previous_version_id != claimed {
    return Err(Error::PredecessorMismatch {
      document: doc.id,
      claimed,
      actual: doc.previous_version_id,
    });
  }
  Ok(())
}
