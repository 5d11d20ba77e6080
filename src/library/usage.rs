//! Usage ledger: which documents embed which materials

use super::MaterialLibrary;
use crate::error::Result;
use crate::markup;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// What a reconciliation changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Materials newly linked to the document
    pub linked: Vec<i64>,
    /// Materials no longer embedded by the document
    pub unlinked: Vec<i64>,
    /// Requested ids with no material behind them
    pub missing: Vec<i64>,
}

impl MaterialLibrary {
    /// Make the ledger rows for one document match `material_ids`.
    ///
    /// Ids of deleted materials are ignored. Safe to repeat: a second call with
    /// the same arguments changes nothing. Use counts are recomputed for every
    /// material that gained or lost a row.
    pub async fn reconcile_usage(
        &self,
        material_ids: &[i64],
        item_type: &str,
        item_id: i64,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let mut live = Vec::new();
        for id in material_ids.iter().copied().collect::<BTreeSet<_>>() {
            if self.db.get_material(id).await?.is_some() {
                live.push(id);
            } else {
                report.missing.push(id);
            }
        }

        report.unlinked = self
            .db
            .prune_usages_for_item(item_type, item_id, &live)
            .await?;

        for &id in &live {
            if self.db.usage_exists(id, item_type, item_id).await? {
                continue;
            }
            if self.db.insert_usage(id, item_type, item_id).await? {
                report.linked.push(id);
            }
        }

        let touched: BTreeSet<i64> = report
            .linked
            .iter()
            .chain(report.unlinked.iter())
            .copied()
            .collect();
        for id in touched {
            self.db.recompute_use_count(id).await?;
        }

        debug!(
            item_type,
            item_id,
            linked = report.linked.len(),
            unlinked = report.unlinked.len(),
            missing = report.missing.len(),
            "Reconciled material usage"
        );
        Ok(report)
    }

    /// Store a document and reconcile the ledger with the markers it contains
    pub async fn record_document(
        &self,
        item_type: &str,
        item_id: i64,
        content: &str,
    ) -> Result<ReconcileReport> {
        self.documents
            .store_content(item_type, item_id, content)
            .await?;
        let embedded = markup::scan_embeds(content);
        self.reconcile_usage(&embedded, item_type, item_id).await
    }
}
