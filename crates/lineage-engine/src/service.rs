//! [`LineageService`]: the per-site orchestrator.
//!
//! Loads a site, plans the whole merge in memory, then persists the plan one
//! record at a time. Manual edits are forwarded to the [`ChainMutator`].

use std::{
  collections::{BTreeSet, HashMap},
  sync::Arc,
};

use lineage_core::{
  document::{DocumentVersion, LineageUpdate},
  lineage::Lineage,
  store::DocumentStore,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
  config::EngineConfig,
  merger::{self, MergePlan},
  mutator::{ChainMutator, Mutation},
  scorer::{MatchScorer, PairScorer},
  Error, Result,
};

/// Summary of one `process_site` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessReport {
  pub site_id:      Uuid,
  pub documents:    usize,
  pub preserved:    usize,
  pub new_lineages: usize,
  pub grafts:       usize,
  /// Records actually rewritten; unchanged records are skipped.
  pub writes:       usize,
}

/// Summary of one `clear_site` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClearReport {
  pub site_id:           Uuid,
  pub documents_cleared: usize,
  pub records_deleted:   usize,
}

pub struct LineageService<S, M> {
  store:   Arc<S>,
  scorer:  PairScorer<M>,
  config:  EngineConfig,
  mutator: ChainMutator<S>,
}

impl<S: DocumentStore, M: MatchScorer> LineageService<S, M> {
  pub fn new(store: Arc<S>, model: M, config: EngineConfig) -> Self {
    Self {
      scorer: PairScorer::new(model, config.matching.clone()),
      mutator: ChainMutator::new(store.clone()),
      store,
      config,
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn config(&self) -> &EngineConfig { &self.config }

  // ── Automatic grouping ───────────────────────────────────────────────────

  /// Regroup a site's unpreserved versions and graft them onto preserved
  /// lineages.
  #[instrument(skip(self))]
  pub async fn process_site(&self, site_id: Uuid) -> Result<ProcessReport> {
    let documents = self.store.list_site_documents(site_id).await.map_err(Error::store)?;
    let records = self.store.list_analysis_records(site_id).await.map_err(Error::store)?;
    let foreign = self.foreign_members(&BTreeSet::from([site_id]), &documents).await?;

    let plan = merger::plan_merge(
      &documents,
      &foreign,
      &records,
      &self.scorer,
      &self.config.grouping,
    )?;
    let writes = self.apply(&plan, &documents).await?;

    let report = ProcessReport {
      site_id,
      documents: documents.len(),
      preserved: plan.preserved.len(),
      new_lineages: plan.new_lineages.len() - plan.grafts.len(),
      grafts: plan.grafts.len(),
      writes,
    };
    tracing::info!(
      documents = report.documents,
      preserved = report.preserved,
      new_lineages = report.new_lineages,
      grafts = report.grafts,
      writes = report.writes,
      "processed site"
    );
    Ok(report)
  }

  /// Clear and reprocess `site_id` together with every site sharing a
  /// lineage with it. Preserved versions keep their lineage fields, and so
  /// does anything linked to a lineage member on a site outside the union.
  #[instrument(skip(self))]
  pub async fn reprocess_site(&self, site_id: Uuid) -> Result<Vec<ProcessReport>> {
    let mut sites: BTreeSet<Uuid> = self
      .store
      .sites_sharing_lineages(site_id)
      .await
      .map_err(Error::store)?
      .into_iter()
      .collect();
    sites.insert(site_id);

    let mut union = Vec::new();
    for site in &sites {
      union.extend(self.store.list_site_documents(*site).await.map_err(Error::store)?);
    }
    let foreign = self.foreign_members(&sites, &union).await?;
    let preserved = merger::preserved_ids(&union, &foreign)?;

    let mut cleared = 0;
    for doc in union.iter().filter(|d| !preserved.contains(&d.id)) {
      if self.write_if_changed(doc, LineageUpdate::clear()).await? {
        cleared += 1;
      }
    }
    tracing::info!(sites = sites.len(), cleared, preserved = preserved.len(), "cleared site union");

    let mut reports = Vec::with_capacity(sites.len());
    for site in sites {
      reports.push(self.process_site(site).await?);
    }
    Ok(reports)
  }

  /// Blank every lineage field on a site and drop its analysis records.
  #[instrument(skip(self))]
  pub async fn clear_site(&self, site_id: Uuid) -> Result<ClearReport> {
    let documents = self.store.list_site_documents(site_id).await.map_err(Error::store)?;
    let mut documents_cleared = 0;
    for doc in &documents {
      if self.write_if_changed(doc, LineageUpdate::clear()).await? {
        documents_cleared += 1;
      }
    }
    let records_deleted =
      self.store.delete_analysis_records(site_id).await.map_err(Error::store)?;

    tracing::info!(documents_cleared, records_deleted, "cleared site");
    Ok(ClearReport { site_id, documents_cleared, records_deleted })
  }

  // ── Manual edits ─────────────────────────────────────────────────────────

  #[instrument(skip(self))]
  pub async fn start_new_lineage(
    &self,
    document_id: Uuid,
    old_predecessor: Option<Uuid>,
    include_later: bool,
  ) -> Result<Mutation> {
    self.mutator.start_new_lineage(document_id, old_predecessor, include_later).await
  }

  #[instrument(skip(self))]
  pub async fn update_lineage(
    &self,
    document_id: Uuid,
    old_predecessor: Option<Uuid>,
    new_predecessor: Option<Uuid>,
    include_later: bool,
  ) -> Result<Mutation> {
    self
      .mutator
      .update_lineage(document_id, old_predecessor, new_predecessor, include_later)
      .await
  }

  // ── Reads ────────────────────────────────────────────────────────────────

  pub async fn document(&self, id: Uuid) -> Result<DocumentVersion> {
    self
      .store
      .get_document(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound(id))
  }

  /// Read and verify one lineage.
  pub async fn lineage(&self, lineage_id: Uuid) -> Result<Lineage> {
    let members = self.store.list_lineage(lineage_id).await.map_err(Error::store)?;
    if members.is_empty() {
      return Err(Error::NotFound(lineage_id));
    }
    Ok(Lineage::from_members(lineage_id, members)?)
  }

  /// Verify every lineage a site's versions belong to.
  pub async fn verify_site(&self, site_id: Uuid) -> Result<Vec<Lineage>> {
    let documents = self.store.list_site_documents(site_id).await.map_err(Error::store)?;
    let lineage_ids: BTreeSet<Uuid> = documents.iter().filter_map(|d| d.lineage_id).collect();
    let mut lineages = Vec::with_capacity(lineage_ids.len());
    for lineage_id in lineage_ids {
      lineages.push(self.lineage(lineage_id).await?);
    }
    Ok(lineages)
  }

  /// Members of the lineages `documents` belong to that live outside `sites`.
  async fn foreign_members(
    &self,
    sites: &BTreeSet<Uuid>,
    documents: &[DocumentVersion],
  ) -> Result<Vec<DocumentVersion>> {
    let lineage_ids: BTreeSet<Uuid> = documents.iter().filter_map(|d| d.lineage_id).collect();
    let mut foreign = Vec::new();
    for lineage_id in lineage_ids {
      let members = self.store.list_lineage(lineage_id).await.map_err(Error::store)?;
      foreign.extend(members.into_iter().filter(|d| !sites.contains(&d.site_id)));
    }
    Ok(foreign)
  }

  // ── Persistence ──────────────────────────────────────────────────────────

  /// Persist `plan` record by record; returns how many records changed.
  async fn apply(&self, plan: &MergePlan, documents: &[DocumentVersion]) -> Result<usize> {
    let by_id: HashMap<Uuid, &DocumentVersion> = documents.iter().map(|d| (d.id, d)).collect();
    let mut writes = 0;

    for (index, lineage) in plan.new_lineages.iter().enumerate() {
      let graft = plan.graft_for(index);
      let lineage_id = graft.map_or(lineage.lineage_id, |g| g.old_lineage_id);
      let last = lineage.members.len() - 1;

      for (i, member) in lineage.members.iter().enumerate() {
        let (previous, confidence) = match (i, graft) {
          (0, Some(g)) => (Some(g.old_tail), Some(g.confidence)),
          _ => (member.previous_version_id, member.confidence),
        };
        let update = LineageUpdate::new()
          .lineage(Some(lineage_id))
          .previous(previous)
          .current(i == last)
          .confidence(confidence);
        let doc = by_id.get(&member.document_id).ok_or(Error::NotFound(member.document_id))?;
        if self.write_if_changed(doc, update).await? {
          writes += 1;
        }
      }
      tracing::debug!(%lineage_id, members = lineage.len(), grafted = graft.is_some(), "persisted lineage");
    }

    for tail in &plan.preserved_tails {
      let doc = by_id.get(&tail.tail).ok_or(Error::NotFound(tail.tail))?;
      let update = LineageUpdate::new().current(!plan.is_grafted(tail.tail));
      if self.write_if_changed(doc, update).await? {
        writes += 1;
      }
    }
    Ok(writes)
  }

  async fn write_if_changed(&self, doc: &DocumentVersion, update: LineageUpdate) -> Result<bool> {
    if !update.changes(doc) {
      return Ok(false);
    }
    self
      .store
      .update_document(doc.id, update)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound(doc.id))?;
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use lineage_core::{document::ClassificationStatus, memory::MemoryStore};

  use super::*;
  use crate::testing::{
    OfflineScorer, TableScorer, chain, date, fetch, linked, record, seed, version,
  };

  fn service(
    store: &Arc<MemoryStore>,
    entries: impl IntoIterator<Item = ((usize, usize), f64)>,
  ) -> LineageService<MemoryStore, TableScorer> {
    LineageService::new(store.clone(), TableScorer::new(entries), EngineConfig::default())
  }

  async fn analyse(store: &MemoryStore, doc: &DocumentVersion, slot: usize) {
    store.upsert_analysis_record(record(doc, slot)).await.unwrap();
  }

  #[tokio::test]
  async fn process_site_groups_fresh_documents() {
    let store = Arc::new(MemoryStore::new());
    let site = Uuid::new_v4();
    let a = version(site, "formulary", date(2023, 1, 1), 1);
    let b = version(site, "formulary", date(2024, 1, 1), 2);
    let c = version(site, "policy", date(2024, 1, 1), 3);
    seed(&store, &[a.clone(), b.clone(), c.clone()]).await;
    for (doc, slot) in [(&a, 1), (&b, 2), (&c, 3)] {
      analyse(&store, doc, slot).await;
    }
    let svc = service(&store, [((1, 2), 0.9), ((1, 3), 0.1), ((2, 3), 0.1)]);

    let report = svc.process_site(site).await.unwrap();
    assert_eq!(report.documents, 3);
    assert_eq!(report.new_lineages, 2);
    assert_eq!(report.grafts, 0);

    let lineages = svc.verify_site(site).await.unwrap();
    assert_eq!(lineages.len(), 2);
    let pair = lineages.iter().find(|l| l.len() == 2).unwrap();
    assert_eq!(pair.ids(), vec![a.id, b.id]);
    assert_eq!(pair.chain[1].confidence, Some(0.9));
    assert!(fetch(&store, b.id).await.is_current_version);
    assert!(fetch(&store, c.id).await.is_current_version);
  }

  #[tokio::test]
  async fn process_site_grafts_onto_approved_lineage() {
    let store = Arc::new(MemoryStore::new());
    let site = Uuid::new_v4();
    let (old_lineage, mut old) = linked(vec![version(site, "formulary", date(2022, 1, 1), 1)]);
    old[0].classification_status = ClassificationStatus::Approved;
    let fresh = version(site, "formulary", date(2024, 1, 1), 2);
    seed(&store, &[old[0].clone(), fresh.clone()]).await;
    analyse(&store, &old[0], 1).await;
    analyse(&store, &fresh, 2).await;
    let svc = service(&store, [((1, 2), 0.85)]);

    let report = svc.process_site(site).await.unwrap();
    assert_eq!(report.preserved, 1);
    assert_eq!(report.grafts, 1);

    assert_eq!(chain(&store, old_lineage).await, vec![old[0].id, fresh.id]);
    let grafted = fetch(&store, fresh.id).await;
    assert_eq!(grafted.confidence, Some(0.85));
    assert!(grafted.is_current_version);
    assert!(!fetch(&store, old[0].id).await.is_current_version);
  }

  #[tokio::test]
  async fn ungrafted_preserved_tail_becomes_current() {
    let store = Arc::new(MemoryStore::new());
    let site = Uuid::new_v4();
    let (old_lineage, mut old) = linked(vec![
      version(site, "formulary", date(2022, 1, 1), 1),
      version(site, "formulary", date(2023, 1, 1), 2),
    ]);
    old[0].classification_status = ClassificationStatus::Approved;
    seed(&store, &old).await;
    analyse(&store, &old[0], 1).await;
    analyse(&store, &old[1], 2).await;
    let svc = service(&store, []);

    svc.process_site(site).await.unwrap();

    assert_eq!(chain(&store, old_lineage).await, vec![old[0].id]);
    assert!(fetch(&store, old[0].id).await.is_current_version);
    let moved = fetch(&store, old[1].id).await;
    assert_ne!(moved.lineage_id, Some(old_lineage));
    assert_eq!(moved.previous_version_id, None);
    assert!(moved.is_current_version);
  }

  #[tokio::test]
  async fn process_site_leaves_successor_on_other_site_current() {
    let store = Arc::new(MemoryStore::new());
    let (site_x, site_y) = (Uuid::new_v4(), Uuid::new_v4());
    let (lineage_id, mut docs) = linked(vec![
      version(site_x, "formulary", date(2022, 1, 1), 1),
      version(site_y, "formulary", date(2023, 1, 1), 2),
    ]);
    docs[0].classification_status = ClassificationStatus::Approved;
    seed(&store, &docs).await;
    analyse(&store, &docs[0], 1).await;
    analyse(&store, &docs[1], 2).await;
    let svc = service(&store, [((1, 2), 0.9)]);

    let report = svc.process_site(site_x).await.unwrap();
    assert_eq!(report.writes, 0);

    assert!(!fetch(&store, docs[0].id).await.is_current_version);
    assert!(fetch(&store, docs[1].id).await.is_current_version);
    assert_eq!(chain(&store, lineage_id).await, vec![docs[0].id, docs[1].id]);
    svc.verify_site(site_x).await.unwrap();
    svc.verify_site(site_y).await.unwrap();
  }

  #[tokio::test]
  async fn process_site_keeps_chains_running_through_other_sites() {
    let store = Arc::new(MemoryStore::new());
    let (site_x, site_y) = (Uuid::new_v4(), Uuid::new_v4());
    let (lineage_id, docs) = linked(vec![
      version(site_x, "formulary", date(2022, 1, 1), 1),
      version(site_y, "formulary", date(2023, 1, 1), 2),
    ]);
    let fresh = version(site_x, "formulary", date(2024, 1, 1), 3);
    seed(&store, &docs).await;
    seed(&store, &[fresh.clone()]).await;
    analyse(&store, &docs[0], 1).await;
    analyse(&store, &fresh, 2).await;
    let svc = service(&store, [((1, 2), 0.9)]);

    let report = svc.process_site(site_x).await.unwrap();
    assert_eq!(report.preserved, 1);
    assert_eq!(report.grafts, 0);

    assert_eq!(chain(&store, lineage_id).await, vec![docs[0].id, docs[1].id]);
    let alone = fetch(&store, fresh.id).await;
    assert_ne!(alone.lineage_id, Some(lineage_id));
    assert_eq!(alone.previous_version_id, None);
    assert!(alone.is_current_version);
    svc.verify_site(site_x).await.unwrap();
    svc.verify_site(site_y).await.unwrap();
  }

  #[tokio::test]
  async fn scorer_failure_aborts_before_any_write() {
    let store = Arc::new(MemoryStore::new());
    let site = Uuid::new_v4();
    let a = version(site, "formulary", None, 1);
    let b = version(site, "formulary", None, 2);
    seed(&store, &[a.clone(), b.clone()]).await;
    analyse(&store, &a, 1).await;
    analyse(&store, &b, 2).await;
    let svc = LineageService::new(store.clone(), OfflineScorer, EngineConfig::default());

    let err = svc.process_site(site).await.unwrap_err();
    assert!(matches!(err, Error::ScorerUnavailable(_)));
    assert_eq!(store.writes(), 0);
  }

  #[tokio::test]
  async fn reprocess_covers_sites_sharing_a_lineage() {
    let store = Arc::new(MemoryStore::new());
    let (site_a, site_b, site_c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (shared, docs) = linked(vec![
      version(site_a, "formulary", date(2022, 1, 1), 1),
      version(site_b, "formulary", date(2023, 1, 1), 2),
    ]);
    let (_, bystander) = linked(vec![version(site_c, "formulary", None, 3)]);
    seed(&store, &docs).await;
    seed(&store, &bystander).await;
    analyse(&store, &docs[0], 1).await;
    analyse(&store, &docs[1], 2).await;
    let svc = service(&store, []);

    let reports = svc.reprocess_site(site_a).await.unwrap();

    let mut expected = vec![site_a, site_b];
    expected.sort();
    assert_eq!(reports.iter().map(|r| r.site_id).collect::<Vec<_>>(), expected);
    assert!(store.list_lineage(shared).await.unwrap().is_empty());
    for doc in &docs {
      let fresh = fetch(&store, doc.id).await;
      assert!(fresh.lineage_id.is_some());
      assert!(fresh.is_current_version);
    }
    assert_eq!(fetch(&store, bystander[0].id).await, bystander[0]);
  }

  #[tokio::test]
  async fn reprocess_keeps_approved_versions() {
    let store = Arc::new(MemoryStore::new());
    let site = Uuid::new_v4();
    let (lineage_id, mut docs) = linked(vec![
      version(site, "formulary", date(2022, 1, 1), 1),
      version(site, "formulary", date(2023, 1, 1), 2),
    ]);
    docs[1].classification_status = ClassificationStatus::Approved;
    seed(&store, &docs).await;
    let svc = service(&store, []);

    svc.reprocess_site(site).await.unwrap();

    assert_eq!(chain(&store, lineage_id).await, vec![docs[0].id, docs[1].id]);
  }

  #[tokio::test]
  async fn reprocess_keeps_approved_chain_spanning_sites() {
    let store = Arc::new(MemoryStore::new());
    let (site_x, site_y) = (Uuid::new_v4(), Uuid::new_v4());
    let (lineage_id, mut docs) = linked(vec![
      version(site_y, "formulary", date(2022, 1, 1), 1),
      version(site_x, "formulary", date(2023, 1, 1), 2),
    ]);
    docs[1].classification_status = ClassificationStatus::Approved;
    seed(&store, &docs).await;
    analyse(&store, &docs[0], 1).await;
    analyse(&store, &docs[1], 2).await;
    let svc = service(&store, [((1, 2), 0.9)]);

    let reports = svc.reprocess_site(site_x).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(store.writes(), 0);

    assert_eq!(chain(&store, lineage_id).await, vec![docs[0].id, docs[1].id]);
    assert_eq!(fetch(&store, docs[1].id).await.previous_version_id, Some(docs[0].id));
    svc.verify_site(site_x).await.unwrap();
    svc.verify_site(site_y).await.unwrap();
  }

  #[tokio::test]
  async fn reprocess_keeps_links_to_sites_outside_the_union() {
    let store = Arc::new(MemoryStore::new());
    let (site_x, site_y, site_z) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (shared, near) = linked(vec![
      version(site_x, "formulary", date(2022, 1, 1), 1),
      version(site_y, "formulary", date(2023, 1, 1), 2),
    ]);
    let (outer, far) = linked(vec![
      version(site_y, "policy", date(2022, 1, 1), 3),
      version(site_z, "policy", date(2023, 1, 1), 4),
    ]);
    seed(&store, &near).await;
    seed(&store, &far).await;
    let svc = service(&store, []);

    let reports = svc.reprocess_site(site_x).await.unwrap();

    let mut expected = vec![site_x, site_y];
    expected.sort();
    assert_eq!(reports.iter().map(|r| r.site_id).collect::<Vec<_>>(), expected);
    assert!(store.list_lineage(shared).await.unwrap().is_empty());
    assert_eq!(chain(&store, outer).await, vec![far[0].id, far[1].id]);
    for site in [site_x, site_y, site_z] {
      svc.verify_site(site).await.unwrap();
    }
  }

  #[tokio::test]
  async fn clear_site_blanks_lineage_fields_and_records() {
    let store = Arc::new(MemoryStore::new());
    let (site, other) = (Uuid::new_v4(), Uuid::new_v4());
    let (_, docs) = linked(vec![
      version(site, "formulary", None, 1),
      version(site, "formulary", None, 2),
    ]);
    let (_, elsewhere) = linked(vec![version(other, "formulary", None, 3)]);
    seed(&store, &docs).await;
    seed(&store, &elsewhere).await;
    analyse(&store, &docs[0], 1).await;
    analyse(&store, &elsewhere[0], 1).await;
    let svc = service(&store, []);

    let report = svc.clear_site(site).await.unwrap();
    assert_eq!(report.documents_cleared, 2);
    assert_eq!(report.records_deleted, 1);

    for doc in &docs {
      let cleared = fetch(&store, doc.id).await;
      assert_eq!(cleared.lineage_id, None);
      assert_eq!(cleared.previous_version_id, None);
      assert!(!cleared.is_current_version);
      assert_eq!(cleared.confidence, None);
    }
    assert!(store.list_analysis_records(site).await.unwrap().is_empty());
    assert_eq!(store.list_analysis_records(other).await.unwrap().len(), 1);
    assert_eq!(fetch(&store, elsewhere[0].id).await, elsewhere[0]);
  }

  #[tokio::test]
  async fn unknown_lineage_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, []);
    let missing = Uuid::new_v4();
    assert!(matches!(svc.lineage(missing).await, Err(Error::NotFound(id)) if id == missing));
    assert!(matches!(svc.document(missing).await, Err(Error::NotFound(_))));
  }

  #[tokio::test]
  async fn manual_edits_go_through_the_mutator() {
    let store = Arc::new(MemoryStore::new());
    let site = Uuid::new_v4();
    let (lineage_id, docs) = linked(vec![
      version(site, "formulary", None, 1),
      version(site, "formulary", None, 2),
    ]);
    seed(&store, &docs).await;
    let svc = service(&store, []);

    let m = svc.start_new_lineage(docs[1].id, Some(docs[0].id), false).await.unwrap();
    assert_eq!(svc.lineage(lineage_id).await.unwrap().ids(), vec![docs[0].id]);

    svc
      .update_lineage(docs[1].id, None, Some(docs[0].id), false)
      .await
      .unwrap();
    assert_eq!(svc.lineage(lineage_id).await.unwrap().ids(), vec![docs[0].id, docs[1].id]);
    assert!(matches!(svc.lineage(m.lineage_id.unwrap()).await, Err(Error::NotFound(_))));
  }
}
