//! Material operations

use super::MaterialLibrary;
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::markup;
use crate::meta::{Material, MaterialFilter, STATUS_ACTIVE};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Create or edit request for a material
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialRequest {
    /// Existing material to edit; absent or 0 creates a new one
    #[serde(default)]
    pub id: Option<i64>,
    /// Derived from the content when absent or blank
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category_id: i64,
    pub content: String,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default)]
    pub origin_url: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
}

/// One page of a material listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialPage {
    pub items: Vec<Material>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Bulk import statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: usize,
    /// Rows addressed by id and overwritten
    pub updated: usize,
    /// Rows reused because identical content already existed
    pub deduplicated: usize,
    /// Requests naming an id that does not exist
    pub skipped: usize,
    pub categories_recounted: usize,
}

fn resolve_title(requested: Option<&str>, content: &str) -> String {
    match requested.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => title.to_string(),
        None => markup::derive_title(content),
    }
}

impl MaterialLibrary {
    /// Paginated listing, newest first. Page 0 is treated as 1 and a page size
    /// of 0 uses the configured default.
    pub async fn list_materials(
        &self,
        category_id: i64,
        keyword: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<MaterialPage> {
        let page = page.max(1);
        let page_size = if page_size == 0 {
            self.default_page_size
        } else {
            page_size
        };

        let filter = MaterialFilter {
            category_id,
            keyword: keyword.map(str::to_string),
            page,
            page_size,
        };
        let (items, total) = self.db.list_materials(&filter).await?;

        Ok(MaterialPage {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Get a material by id
    pub async fn get_material(&self, id: i64) -> Result<Material> {
        self.db
            .get_material(id)
            .await?
            .ok_or_else(|| Error::MaterialNotFound(id.to_string()))
    }

    /// Create or edit a material.
    ///
    /// The content is sanitized before it is stored. When the material is
    /// auto-updating and an edit changed its body, propagation is queued and
    /// this call returns without waiting for it.
    pub async fn save_material(&self, req: MaterialRequest) -> Result<Material> {
        if req.category_id != 0 && self.db.get_category(req.category_id).await?.is_none() {
            return Err(Error::CategoryNotFound(req.category_id.to_string()));
        }

        let existing = match req.id.filter(|id| *id > 0) {
            Some(id) => Some(self.get_material(id).await?),
            None => None,
        };

        let prior_hash = existing.as_ref().map(|m| m.content_hash.clone());
        let prior_category = existing.as_ref().map(|m| m.category_id);

        let content = self.sanitizer.sanitize(&req.content).await;
        let title = resolve_title(req.title.as_deref(), &content);

        let mut material = match existing {
            Some(m) => m,
            None => Material::new(title.clone(), req.category_id, content.clone()),
        };
        material.title = title;
        material.category_id = req.category_id;
        material.content_hash = fingerprint(&content);
        material.content = content;
        material.auto_update = req.auto_update;
        material.status = STATUS_ACTIVE;
        if let Some(origin_url) = req.origin_url {
            material.origin_url = origin_url;
        }
        if let Some(keyword) = req.keyword {
            material.keyword = keyword;
        }
        material.updated_at = Utc::now().to_rfc3339();

        if material.id == 0 {
            material.id = self.db.insert_material(&material).await?;
            info!(id = material.id, title = %material.title, "Created material");
        } else {
            self.db.update_material(&material).await?;
            info!(id = material.id, title = %material.title, "Updated material");
        }

        let mut categories = BTreeSet::from([material.category_id]);
        categories.extend(prior_category);
        for category_id in categories.into_iter().filter(|id| *id != 0) {
            self.db.recompute_category_count(category_id).await?;
        }

        let changed = prior_hash.is_some_and(|h| h != material.content_hash);
        if material.auto_update && changed {
            self.schedule_propagation(material.id);
        }

        Ok(material)
    }

    /// Delete a material together with its ledger rows
    pub async fn delete_material(&self, id: i64) -> Result<()> {
        let material = self.get_material(id).await?;

        let removed = self.db.delete_usages_for_material(id).await?;
        self.db.delete_material(id).await?;
        if material.category_id != 0 {
            self.db.recompute_category_count(material.category_id).await?;
        }

        info!(id, usages = removed, "Deleted material");
        Ok(())
    }

    /// Import many materials at once, reusing rows by id or identical content.
    ///
    /// Content is stored as given. Category counts are recomputed once per
    /// touched category after the batch, also when a request fails part way;
    /// the first failure is returned after the recount.
    pub async fn bulk_import(&self, requests: Vec<MaterialRequest>) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        let mut touched = BTreeSet::new();
        let mut failure = None;

        for req in requests {
            if let Err(e) = self.import_one(req, &mut report, &mut touched).await {
                warn!(error = %e, "Bulk import stopped on a failed request");
                failure = Some(e);
                break;
            }
        }

        for category_id in touched.into_iter().filter(|id| *id != 0) {
            match self.db.recompute_category_count(category_id).await {
                Ok(_) => report.categories_recounted += 1,
                Err(e) => {
                    warn!(category_id, error = %e, "Category recount failed");
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        info!(
            created = report.created,
            updated = report.updated,
            deduplicated = report.deduplicated,
            skipped = report.skipped,
            "Bulk import complete"
        );
        Ok(report)
    }

    async fn import_one(
        &self,
        req: MaterialRequest,
        report: &mut ImportReport,
        touched: &mut BTreeSet<i64>,
    ) -> Result<()> {
        let hash = fingerprint(&req.content);

        let (existing, by_id) = match req.id.filter(|id| *id > 0) {
            Some(id) => match self.db.get_material(id).await? {
                Some(m) => (Some(m), true),
                None => {
                    debug!(id, "Import names a missing material, skipping");
                    report.skipped += 1;
                    return Ok(());
                }
            },
            None => {
                let duplicate = self
                    .db
                    .find_materials_by_hash(&hash)
                    .await?
                    .into_iter()
                    .find(|m| m.content == req.content);
                (duplicate, false)
            }
        };

        let title = resolve_title(req.title.as_deref(), &req.content);
        let mut material = match existing {
            Some(m) => {
                touched.insert(m.category_id);
                m
            }
            None => Material::new(title.clone(), req.category_id, req.content.clone()),
        };

        material.title = title;
        material.category_id = req.category_id;
        material.content = req.content;
        material.content_hash = hash;
        material.auto_update = req.auto_update;
        material.status = STATUS_ACTIVE;
        if let Some(origin_url) = req.origin_url {
            material.origin_url = origin_url;
        }
        if let Some(keyword) = req.keyword {
            material.keyword = keyword;
        }
        material.updated_at = Utc::now().to_rfc3339();

        if material.id == 0 {
            material.id = self.db.insert_material(&material).await?;
            report.created += 1;
        } else {
            self.db.update_material(&material).await?;
            if by_id {
                report.updated += 1;
            } else {
                report.deduplicated += 1;
            }
        }
        touched.insert(material.category_id);
        Ok(())
    }

    /// First material whose title starts with the normalized `title`
    pub async fn find_by_title_prefix(&self, title: &str) -> Result<Material> {
        let prefix = markup::title_prefix(title);
        if prefix.is_empty() {
            return Err(Error::MaterialNotFound(title.to_string()));
        }
        self.db
            .find_material_by_title_prefix(&prefix)
            .await?
            .ok_or_else(|| Error::MaterialNotFound(title.to_string()))
    }

    pub async fn find_by_origin_url(&self, origin_url: &str) -> Result<Material> {
        self.db
            .find_material_by_origin_url(origin_url)
            .await?
            .ok_or_else(|| Error::MaterialNotFound(origin_url.to_string()))
    }

    pub async fn find_all_by_keyword(&self, keyword: &str) -> Result<Vec<Material>> {
        self.db.list_materials_by_keyword(keyword).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::{setup_test_library, CategoryRequest};
    use super::*;
    use crate::markup::embed_marker;
    use crate::propagate::{PropagationOutcome, PropagationPool};

    fn request(content: &str) -> MaterialRequest {
        MaterialRequest {
            content: content.to_string(),
            ..Default::default()
        }
    }

    async fn assert_category_count_matches(lib: &MaterialLibrary, category_id: i64) {
        let stored = lib.db().get_category(category_id).await.unwrap().unwrap();
        let live = lib.db().count_live_materials(category_id).await.unwrap();
        assert_eq!(stored.material_count, live);
    }

    #[tokio::test]
    async fn test_save_derives_title_and_fingerprint() {
        let (lib, _tmp) = setup_test_library().await;

        let material = lib
            .save_material(request(
                "<p>abcdefghijklmnopqrstuvwxyz0123456789ABCD</p>",
            ))
            .await
            .unwrap();

        assert!(material.id > 0);
        assert_eq!(material.title, "abcdefghijklmnopqrstuvwxyz0123...");
        assert_eq!(material.content_hash, fingerprint(&material.content));
        assert_eq!(material.status, STATUS_ACTIVE);
    }

    #[tokio::test]
    async fn test_save_sanitizes_content() {
        let (lib, _tmp) = setup_test_library().await;

        let material = lib
            .save_material(request(
                r#"<p><a href="https://example.com/faq">FAQ</a>&nbsp;<a href="http://other.example/x">x</a></p>"#,
            ))
            .await
            .unwrap();

        assert_eq!(
            material.content,
            r#"<p><a href="/faq">FAQ</a> <a href="http://other.example/x" rel="nofollow">x</a></p>"#
        );
    }

    #[tokio::test]
    async fn test_save_rejects_unknown_category_and_material() {
        let (lib, _tmp) = setup_test_library().await;

        let mut req = request("<p>x</p>");
        req.category_id = 42;
        assert!(matches!(
            lib.save_material(req).await,
            Err(Error::CategoryNotFound(_))
        ));

        let mut req = request("<p>x</p>");
        req.id = Some(42);
        assert!(lib.save_material(req).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_category_counts_follow_creates_moves_and_deletes() {
        let (lib, _tmp) = setup_test_library().await;
        let a = lib
            .save_category(CategoryRequest::new("A"))
            .await
            .unwrap()
            .id;
        let b = lib
            .save_category(CategoryRequest::new("B"))
            .await
            .unwrap()
            .id;

        let mut ids = Vec::new();
        for n in 0..3 {
            let mut req = request(&format!("<p>{}</p>", n));
            req.category_id = a;
            ids.push(lib.save_material(req).await.unwrap().id);
        }
        assert_category_count_matches(&lib, a).await;
        assert_eq!(lib.db().get_category(a).await.unwrap().unwrap().material_count, 3);

        let mut moved = request("<p>0</p>");
        moved.id = Some(ids[0]);
        moved.category_id = b;
        lib.save_material(moved).await.unwrap();
        assert_category_count_matches(&lib, a).await;
        assert_category_count_matches(&lib, b).await;
        assert_eq!(lib.db().get_category(b).await.unwrap().unwrap().material_count, 1);

        lib.delete_material(ids[1]).await.unwrap();
        assert_category_count_matches(&lib, a).await;
        assert_eq!(lib.db().get_category(a).await.unwrap().unwrap().material_count, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_ledger_rows() {
        let (lib, _tmp) = setup_test_library().await;
        let material = lib.save_material(request("<p>x</p>")).await.unwrap();
        lib.reconcile_usage(&[material.id], "archive", 1)
            .await
            .unwrap();

        lib.delete_material(material.id).await.unwrap();
        assert!(lib
            .db()
            .list_usages_for_item("archive", 1)
            .await
            .unwrap()
            .is_empty());
        assert!(lib.delete_material(material.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_edit_of_auto_update_material_propagates_in_background() {
        let (lib, _tmp) = setup_test_library().await;
        let pool = PropagationPool::start(lib.propagator(), 1, 8);
        let lib = lib.with_queue(pool.queue());
        let mut events = pool.subscribe();

        let mut req = request("<p>v1</p>");
        req.auto_update = true;
        let material = lib.save_material(req).await.unwrap();
        lib.record_document("archive", 5, &embed_marker(material.id, "<p>v1</p>"))
            .await
            .unwrap();

        let mut edit = request("<p>v2</p>");
        edit.id = Some(material.id);
        edit.auto_update = true;
        lib.save_material(edit).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.material_id, material.id);
        assert!(matches!(event.outcome, PropagationOutcome::Completed { .. }));
        pool.shutdown().await;

        let doc = lib.db().get_document("archive", 5).await.unwrap().unwrap();
        assert_eq!(doc.content, embed_marker(material.id, "<p>v2</p>"));
    }

    #[tokio::test]
    async fn test_edit_propagates_without_attached_pool() {
        let (lib, _tmp) = setup_test_library().await;

        let mut req = request("<p>v1</p>");
        req.auto_update = true;
        let material = lib.save_material(req).await.unwrap();
        lib.record_document("archive", 6, &embed_marker(material.id, "<p>v1</p>"))
            .await
            .unwrap();

        let mut edit = request("<p>v2</p>");
        edit.id = Some(material.id);
        edit.auto_update = true;
        lib.save_material(edit).await.unwrap();

        let expected = embed_marker(material.id, "<p>v2</p>");
        let mut converged = false;
        for _ in 0..100 {
            let doc = lib.db().get_document("archive", 6).await.unwrap().unwrap();
            if doc.content == expected {
                converged = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(converged, "edit never reached the embedding document");
    }

    #[tokio::test]
    async fn test_bulk_import_dedups_and_recounts_once() {
        let (lib, _tmp) = setup_test_library().await;
        let cat = lib
            .save_category(CategoryRequest::new("Imported"))
            .await
            .unwrap()
            .id;

        let existing = lib.save_material(request("<p>shared</p>")).await.unwrap();

        let mut dup = request("<p>shared</p>");
        dup.category_id = cat;
        let mut fresh = request("<p>abcdefghijklmnopqrstuvwxyz0123456789ABCD</p>");
        fresh.category_id = cat;
        let mut by_id = request("<p>replaced</p>");
        by_id.id = Some(existing.id);
        by_id.category_id = cat;
        let mut missing = request("<p>ghost</p>");
        missing.id = Some(9_999);

        let report = lib
            .bulk_import(vec![dup, fresh, missing, by_id])
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.deduplicated, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped, 1);

        let reused = lib.get_material(existing.id).await.unwrap();
        assert_eq!(reused.content, "<p>replaced</p>");
        assert_eq!(reused.category_id, cat);

        let (items, total) = lib
            .db()
            .list_materials(&MaterialFilter {
                category_id: cat,
                keyword: None,
                page: 1,
                page_size: 10,
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(items
            .iter()
            .any(|m| m.title == "abcdefghijklmnopqrstuvwxyz0123..."));
        assert_category_count_matches(&lib, cat).await;
        assert_eq!(lib.db().get_category(cat).await.unwrap().unwrap().material_count, 2);
    }

    #[tokio::test]
    async fn test_bulk_import_failure_still_recounts_earlier_categories() {
        let (lib, _tmp) = setup_test_library().await;
        let cat = lib
            .save_category(CategoryRequest::new("Batch"))
            .await
            .unwrap()
            .id;
        sqlx::query(
            "CREATE TRIGGER reject_broken BEFORE INSERT ON materials \
             WHEN NEW.title = 'broken' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(lib.db().pool())
        .await
        .unwrap();

        let mut first = request("<p>first</p>");
        first.category_id = cat;
        let mut broken = request("<p>second</p>");
        broken.category_id = cat;
        broken.title = Some("broken".to_string());
        let mut never = request("<p>third</p>");
        never.category_id = cat;

        let err = lib.bulk_import(vec![first, broken, never]).await;
        assert!(matches!(err, Err(Error::Database(_))));

        assert_category_count_matches(&lib, cat).await;
        assert_eq!(lib.db().get_category(cat).await.unwrap().unwrap().material_count, 1);
    }

    #[tokio::test]
    async fn test_list_materials_paginates_with_category_titles() {
        let (lib, _tmp) = setup_test_library().await;
        let cat = lib
            .save_category(CategoryRequest::new("Promo"))
            .await
            .unwrap()
            .id;
        for n in 0..5 {
            let mut req = request(&format!("<p>promo {}</p>", n));
            req.category_id = cat;
            lib.save_material(req).await.unwrap();
        }
        lib.save_material(request("<p>other</p>")).await.unwrap();

        let page = lib.list_materials(cat, Some("promo"), 2, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].title, "promo 2");
        assert_eq!(page.items[0].category_title.as_deref(), Some("Promo"));

        let all = lib.list_materials(0, None, 0, 0).await.unwrap();
        assert_eq!(all.page, 1);
        assert_eq!(all.total, 6);
        assert_eq!(all.items[0].title, "other");
    }

    #[tokio::test]
    async fn test_lookups() {
        let (lib, _tmp) = setup_test_library().await;

        let mut req = request("<p>body</p>");
        req.title = Some("Winter clearance event starts in December".to_string());
        req.origin_url = Some("https://source.example/post/1".to_string());
        req.keyword = Some("sale".to_string());
        let saved = lib.save_material(req).await.unwrap();

        let found = lib
            .find_by_title_prefix("<b>Winter clearance</b> event")
            .await
            .unwrap();
        assert_eq!(found.id, saved.id);
        assert!(lib
            .find_by_title_prefix("Summer")
            .await
            .unwrap_err()
            .is_not_found());

        let found = lib
            .find_by_origin_url("https://source.example/post/1")
            .await
            .unwrap();
        assert_eq!(found.id, saved.id);
        assert!(lib.find_by_origin_url("nope").await.is_err());

        assert_eq!(lib.find_all_by_keyword("sale").await.unwrap().len(), 1);
        assert!(lib.find_all_by_keyword("sal").await.unwrap().is_empty());
    }
}
