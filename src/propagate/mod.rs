//! Propagation of edited materials into embedding documents
//!
//! A [`Propagator`] rewrites every document listed in the usage ledger for a
//! material, replacing the inside of its embed markers with the material's
//! current body. Documents whose content would not change are not written.
//! [`PropagationPool`] runs propagation jobs on background workers.

mod pool;

pub use pool::*;

use crate::error::Result;
use crate::markup;
use crate::meta::{DocumentStore, Material, MetaDb};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of propagating one material
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReport {
    /// Ledger rows visited
    pub documents_scanned: usize,
    /// Documents rewritten and stored
    pub documents_updated: usize,
    /// Documents already holding the current body
    pub documents_unchanged: usize,
    /// Documents missing, without a marker, or failing to load/store
    pub documents_skipped: usize,
}

impl PropagationReport {
    fn merge(&mut self, other: &PropagationReport) {
        self.documents_scanned += other.documents_scanned;
        self.documents_updated += other.documents_updated;
        self.documents_unchanged += other.documents_unchanged;
        self.documents_skipped += other.documents_skipped;
    }
}

/// Outcome of a refresh over every auto-update material
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshReport {
    pub materials: usize,
    pub failed: usize,
    pub totals: PropagationReport,
}

/// Pushes material bodies into the documents that embed them
#[derive(Clone)]
pub struct Propagator {
    db: MetaDb,
    documents: Arc<dyn DocumentStore>,
}

impl Propagator {
    pub fn new(db: MetaDb, documents: Arc<dyn DocumentStore>) -> Self {
        Self { db, documents }
    }

    /// Propagate `material` as given. No-op unless auto-update is set.
    ///
    /// Per-document failures are logged and counted as skipped; only ledger
    /// and storage errors for the material itself are returned.
    pub async fn propagate(&self, material: &Material) -> Result<PropagationReport> {
        let mut report = PropagationReport::default();
        if !material.auto_update {
            debug!(material_id = material.id, "Auto-update disabled, nothing to propagate");
            return Ok(report);
        }

        let usages = self.db.list_usages_for_material(material.id).await?;
        for usage in usages {
            report.documents_scanned += 1;

            let current = match self
                .documents
                .load_content(&usage.item_type, usage.item_id)
                .await
            {
                Ok(Some(content)) => content,
                Ok(None) => {
                    warn!(
                        material_id = material.id,
                        item_type = %usage.item_type,
                        item_id = usage.item_id,
                        "Embedding document not found, skipping"
                    );
                    report.documents_skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        material_id = material.id,
                        item_type = %usage.item_type,
                        item_id = usage.item_id,
                        error = %e,
                        "Failed to load document, skipping"
                    );
                    report.documents_skipped += 1;
                    continue;
                }
            };

            let Some(updated) = markup::replace_embeds(&current, material.id, &material.content)
            else {
                debug!(
                    material_id = material.id,
                    item_type = %usage.item_type,
                    item_id = usage.item_id,
                    "No embed marker in document"
                );
                report.documents_skipped += 1;
                continue;
            };

            if updated == current {
                report.documents_unchanged += 1;
                continue;
            }

            match self
                .documents
                .store_content(&usage.item_type, usage.item_id, &updated)
                .await
            {
                Ok(()) => report.documents_updated += 1,
                Err(e) => {
                    warn!(
                        material_id = material.id,
                        item_type = %usage.item_type,
                        item_id = usage.item_id,
                        error = %e,
                        "Failed to store document, skipping"
                    );
                    report.documents_skipped += 1;
                }
            }
        }

        info!(
            material_id = material.id,
            scanned = report.documents_scanned,
            updated = report.documents_updated,
            unchanged = report.documents_unchanged,
            skipped = report.documents_skipped,
            "Propagation complete"
        );
        Ok(report)
    }

    /// Load the current row for `material_id` and propagate it.
    ///
    /// Returns `None` when the material no longer exists.
    pub async fn propagate_id(&self, material_id: i64) -> Result<Option<PropagationReport>> {
        match self.db.get_material(material_id).await? {
            Some(material) => Ok(Some(self.propagate(&material).await?)),
            None => {
                debug!(material_id, "Material gone before propagation");
                Ok(None)
            }
        }
    }

    /// Propagate every auto-update material, one after another.
    ///
    /// `on_progress` is called after each material.
    pub async fn refresh<F>(&self, mut on_progress: F) -> Result<RefreshReport>
    where
        F: FnMut(&Material, &Result<PropagationReport>),
    {
        let materials = self.db.list_auto_update_materials().await?;
        let mut report = RefreshReport {
            materials: materials.len(),
            ..Default::default()
        };

        for material in &materials {
            let outcome = self.propagate(material).await;
            match &outcome {
                Ok(r) => report.totals.merge(r),
                Err(e) => {
                    warn!(material_id = material.id, error = %e, "Refresh failed for material");
                    report.failed += 1;
                }
            }
            on_progress(material, &outcome);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::embed_marker;
    use crate::meta::setup_test_db;

    async fn seed_material(db: &MetaDb, body: &str, auto_update: bool) -> Material {
        let mut material = Material::new("Shipping".to_string(), 0, body.to_string());
        material.auto_update = auto_update;
        material.id = db.insert_material(&material).await.unwrap();
        material
    }

    #[tokio::test]
    async fn test_propagation_converges_and_skips_unchanged() {
        let (db, _tmp) = setup_test_db().await;
        let material = seed_material(&db, "<p>old</p>", true).await;

        db.put_document(
            "archive",
            1,
            &format!("<h1>One</h1>{}", embed_marker(material.id, "<p>old</p>")),
        )
        .await
        .unwrap();
        db.put_document(
            "archive",
            2,
            &format!("{}<p>tail</p>", embed_marker(material.id, "<p>old</p>")),
        )
        .await
        .unwrap();
        db.put_document("archive", 3, &embed_marker(material.id, "<p>new</p>"))
            .await
            .unwrap();
        for item_id in 1..=3 {
            db.insert_usage(material.id, "archive", item_id).await.unwrap();
        }

        let mut edited = material.clone();
        edited.content = "<p>new</p>".to_string();
        db.update_material(&edited).await.unwrap();

        let propagator = Propagator::new(db.clone(), Arc::new(db.clone()));
        let report = propagator.propagate(&edited).await.unwrap();

        assert_eq!(report.documents_scanned, 3);
        assert_eq!(report.documents_updated, 2);
        assert_eq!(report.documents_unchanged, 1);
        assert_eq!(report.documents_skipped, 0);

        for item_id in 1..=3 {
            let doc = db.get_document("archive", item_id).await.unwrap().unwrap();
            assert!(doc
                .content
                .contains(&embed_marker(material.id, "<p>new</p>")));
            let expected_revision = if item_id == 3 { 1 } else { 2 };
            assert_eq!(doc.revision, expected_revision, "document {}", item_id);
        }

        // A second run writes nothing
        let again = propagator.propagate(&edited).await.unwrap();
        assert_eq!(again.documents_updated, 0);
        assert_eq!(again.documents_unchanged, 3);
    }

    #[tokio::test]
    async fn test_propagation_is_noop_without_auto_update() {
        let (db, _tmp) = setup_test_db().await;
        let material = seed_material(&db, "<p>body</p>", false).await;
        db.put_document("archive", 1, &embed_marker(material.id, "<p>stale</p>"))
            .await
            .unwrap();
        db.insert_usage(material.id, "archive", 1).await.unwrap();

        let propagator = Propagator::new(db.clone(), Arc::new(db.clone()));
        let report = propagator.propagate(&material).await.unwrap();
        assert_eq!(report, PropagationReport::default());

        let doc = db.get_document("archive", 1).await.unwrap().unwrap();
        assert_eq!(doc.revision, 1);
    }

    #[tokio::test]
    async fn test_bad_documents_do_not_stop_propagation() {
        let (db, _tmp) = setup_test_db().await;
        let material = seed_material(&db, "<p>fresh</p>", true).await;

        // 1: missing document, 2: no marker, 3: good
        db.put_document("archive", 2, "<p>no marker here</p>")
            .await
            .unwrap();
        db.put_document("archive", 3, &embed_marker(material.id, "<p>stale</p>"))
            .await
            .unwrap();
        for item_id in 1..=3 {
            db.insert_usage(material.id, "archive", item_id).await.unwrap();
        }

        let propagator = Propagator::new(db.clone(), Arc::new(db.clone()));
        let report = propagator.propagate(&material).await.unwrap();
        assert_eq!(report.documents_skipped, 2);
        assert_eq!(report.documents_updated, 1);

        let doc = db.get_document("archive", 3).await.unwrap().unwrap();
        assert_eq!(doc.content, embed_marker(material.id, "<p>fresh</p>"));
    }

    #[tokio::test]
    async fn test_refresh_covers_auto_update_materials() {
        let (db, _tmp) = setup_test_db().await;
        let auto = seed_material(&db, "<p>auto</p>", true).await;
        let manual = seed_material(&db, "<p>manual</p>", false).await;

        let content = format!(
            "{}{}",
            embed_marker(auto.id, "x"),
            embed_marker(manual.id, "y")
        );
        db.put_document("page", 7, &content).await.unwrap();
        db.insert_usage(auto.id, "page", 7).await.unwrap();
        db.insert_usage(manual.id, "page", 7).await.unwrap();

        let propagator = Propagator::new(db.clone(), Arc::new(db.clone()));
        let mut seen = Vec::new();
        let report = propagator
            .refresh(|m, _| seen.push(m.id))
            .await
            .unwrap();

        assert_eq!(report.materials, 1);
        assert_eq!(report.totals.documents_updated, 1);
        assert_eq!(seen, vec![auto.id]);

        let doc = db.get_document("page", 7).await.unwrap().unwrap();
        assert!(doc.content.contains(&embed_marker(auto.id, "<p>auto</p>")));
        assert!(doc.content.contains(&embed_marker(manual.id, "y")));
    }
}
