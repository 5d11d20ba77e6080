//! Material library service
//!
//! Ties the sanitizer, fingerprinting, storage and propagation together:
//! - material save/delete/list/bulk import with derived category counts
//! - category management with the in-use check on delete
//! - the usage ledger that links documents to the materials they embed

mod categories;
mod materials;
mod usage;

pub use categories::*;
pub use materials::*;
pub use usage::*;

use crate::config::Config;
use crate::error::Result;
use crate::meta::{DocumentStore, MetaDb};
use crate::propagate::{PropagationQueue, Propagator};
use crate::sanitize::{HttpImageFetcher, ImageFetcher, SanitizePolicy, Sanitizer};
use std::sync::Arc;
use tracing::{debug, warn};

/// Entry point for every material operation
#[derive(Clone)]
pub struct MaterialLibrary {
    db: MetaDb,
    documents: Arc<dyn DocumentStore>,
    sanitizer: Sanitizer,
    queue: Option<PropagationQueue>,
    default_page_size: u32,
}

impl MaterialLibrary {
    pub fn new(db: MetaDb, documents: Arc<dyn DocumentStore>, sanitizer: Sanitizer) -> Self {
        Self {
            db,
            documents,
            sanitizer,
            queue: None,
            default_page_size: crate::config::default_page_size(),
        }
    }

    /// Build from configuration, using `db` as the document store as well
    pub fn from_config(config: &Config, db: MetaDb) -> Result<Self> {
        let fetcher: Option<Arc<dyn ImageFetcher>> = if config.content.remote_download {
            Some(Arc::new(HttpImageFetcher::new(config)?))
        } else {
            None
        };
        let sanitizer = Sanitizer::new(SanitizePolicy::from_config(config), fetcher);
        let documents: Arc<dyn DocumentStore> = Arc::new(db.clone());

        Ok(Self::new(db, documents, sanitizer).with_default_page_size(config.list.default_page_size))
    }

    /// Route propagation of edited materials to a worker pool instead of
    /// one detached task per edit
    pub fn with_queue(mut self, queue: PropagationQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_default_page_size(mut self, page_size: u32) -> Self {
        self.default_page_size = page_size.max(1);
        self
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    /// A propagator over the same storage and document store
    pub fn propagator(&self) -> Propagator {
        Propagator::new(self.db.clone(), Arc::clone(&self.documents))
    }

    /// Hand an edited material to the worker pool, or to a detached task when
    /// no pool is attached (or the pool has shut down)
    fn schedule_propagation(&self, material_id: i64) {
        if let Some(queue) = &self.queue {
            if queue.schedule(material_id) {
                return;
            }
            warn!(material_id, "Propagation pool closed, propagating in a detached task");
        }

        let propagator = self.propagator();
        tokio::spawn(async move {
            match propagator.propagate_id(material_id).await {
                Ok(Some(report)) => debug!(
                    material_id,
                    updated = report.documents_updated,
                    skipped = report.documents_skipped,
                    "Detached propagation finished"
                ),
                Ok(None) => debug!(material_id, "Material gone before propagation"),
                Err(e) => warn!(material_id, error = %e, "Detached propagation failed"),
            }
        });
    }
}

#[cfg(test)]
pub(crate) async fn setup_test_library() -> (MaterialLibrary, tempfile::TempDir) {
    let (db, tmp) = crate::meta::setup_test_db().await;
    let policy = SanitizePolicy {
        base_url: "https://example.com".to_string(),
        ..Default::default()
    };
    let documents: Arc<dyn DocumentStore> = Arc::new(db.clone());
    (
        MaterialLibrary::new(db, documents, Sanitizer::new(policy, None)),
        tmp,
    )
}
