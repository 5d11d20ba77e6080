//! Material storage using SQLite
//!
//! This module handles all local storage including:
//! - Material categories
//! - Materials (reusable HTML snippets)
//! - Material usages (the ledger of which documents embed which materials)
//! - Documents (content of embedding documents, behind [`DocumentStore`])

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};

/// Status value of live rows
pub const STATUS_ACTIVE: i64 = 1;

/// A reusable HTML snippet
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Material {
    pub id: i64,
    pub title: String,
    pub category_id: i64,
    pub content: String,
    pub content_hash: String,
    pub auto_update: bool,
    pub use_count: i64,
    pub status: i64,
    pub origin_url: String,
    pub keyword: String,
    pub created_at: String,
    pub updated_at: String,
    /// Resolved category title (list queries only)
    #[sqlx(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_title: Option<String>,
}

impl Material {
    /// A new, not yet persisted, active material (id 0)
    pub fn new(title: String, category_id: i64, content: String) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: 0,
            title,
            category_id,
            content_hash: crate::fingerprint::fingerprint(&content),
            content,
            auto_update: false,
            use_count: 0,
            status: STATUS_ACTIVE,
            origin_url: String::new(),
            keyword: String::new(),
            created_at: now.clone(),
            updated_at: now,
            category_title: None,
        }
    }
}

/// A material category
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MaterialCategory {
    pub id: i64,
    pub title: String,
    pub status: i64,
    pub material_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl MaterialCategory {
    pub fn new(title: String) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: 0,
            title,
            status: STATUS_ACTIVE,
            material_count: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// One ledger row: document (item_type, item_id) embeds material_id
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaterialUsage {
    pub id: i64,
    pub material_id: i64,
    pub item_type: String,
    pub item_id: i64,
    pub created_at: String,
}

/// Stored content of an embedding document
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub item_type: String,
    pub item_id: i64,
    pub content: String,
    pub revision: i64,
    pub updated_at: String,
}

/// Filter for paginated material listings
#[derive(Debug, Clone)]
pub struct MaterialFilter {
    /// 0 means all categories
    pub category_id: i64,
    /// Substring match on title
    pub keyword: Option<String>,
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
}

/// Global statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub category_count: usize,
    pub material_count: usize,
    pub usage_count: usize,
    pub document_count: usize,
}

/// Read/write access to the content of documents that embed materials.
///
/// Documents belong to the host CMS; the library only needs to read a
/// document's content and write it back after propagation.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_content(&self, item_type: &str, item_id: i64) -> Result<Option<String>>;
    async fn store_content(&self, item_type: &str, item_id: i64, content: &str) -> Result<()>;
}

/// Escape `%`, `_` and `\` for a LIKE pattern using `ESCAPE '\'`
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Material database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the database configured in `config` and ensure the schema
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.db_file).await
    }

    /// Create database with path directly (without full config)
    pub async fn new(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='materials'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    // ===== Category Operations =====

    /// Insert a new category, returning its id
    pub async fn insert_category(&self, category: &MaterialCategory) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO material_categories (title, status, material_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&category.title)
        .bind(category.status)
        .bind(category.material_count)
        .bind(&category.created_at)
        .bind(&category.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Update title and status of a category
    pub async fn update_category(&self, category: &MaterialCategory) -> Result<()> {
        sqlx::query("UPDATE material_categories SET title = ?, status = ?, updated_at = ? WHERE id = ?")
            .bind(&category.title)
            .bind(category.status)
            .bind(Utc::now().to_rfc3339())
            .bind(category.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get category by ID
    pub async fn get_category(&self, id: i64) -> Result<Option<MaterialCategory>> {
        let category =
            sqlx::query_as::<_, MaterialCategory>("SELECT * FROM material_categories WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(category)
    }

    /// List active categories
    pub async fn list_categories(&self) -> Result<Vec<MaterialCategory>> {
        let categories = sqlx::query_as::<_, MaterialCategory>(
            "SELECT * FROM material_categories WHERE status = ? ORDER BY id",
        )
        .bind(STATUS_ACTIVE)
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    /// Delete a category row
    pub async fn delete_category(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM material_categories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Count live materials referencing a category
    pub async fn count_live_materials(&self, category_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM materials WHERE category_id = ? AND status = ?")
                .bind(category_id)
                .bind(STATUS_ACTIVE)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Re-count live materials of a category and store the result
    pub async fn recompute_category_count(&self, category_id: i64) -> Result<i64> {
        let count = self.count_live_materials(category_id).await?;
        sqlx::query("UPDATE material_categories SET material_count = ? WHERE id = ?")
            .bind(count)
            .bind(category_id)
            .execute(&self.pool)
            .await?;
        debug!(category_id, count, "Recomputed category material count");
        Ok(count)
    }

    // ===== Material Operations =====

    /// Insert a new material, returning its id
    pub async fn insert_material(&self, material: &Material) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO materials (title, category_id, content, content_hash, auto_update, use_count, status, origin_url, keyword, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&material.title)
        .bind(material.category_id)
        .bind(&material.content)
        .bind(&material.content_hash)
        .bind(material.auto_update)
        .bind(material.use_count)
        .bind(material.status)
        .bind(&material.origin_url)
        .bind(&material.keyword)
        .bind(&material.created_at)
        .bind(&material.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Update every editable column of a material
    pub async fn update_material(&self, material: &Material) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE materials SET
                title = ?,
                category_id = ?,
                content = ?,
                content_hash = ?,
                auto_update = ?,
                status = ?,
                origin_url = ?,
                keyword = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&material.title)
        .bind(material.category_id)
        .bind(&material.content)
        .bind(&material.content_hash)
        .bind(material.auto_update)
        .bind(material.status)
        .bind(&material.origin_url)
        .bind(&material.keyword)
        .bind(&material.updated_at)
        .bind(material.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get material by ID
    pub async fn get_material(&self, id: i64) -> Result<Option<Material>> {
        let material = sqlx::query_as::<_, Material>("SELECT * FROM materials WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(material)
    }

    /// Delete a material row
    pub async fn delete_material(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM materials WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Paginated listing, newest first, with category titles resolved
    pub async fn list_materials(&self, filter: &MaterialFilter) -> Result<(Vec<Material>, i64)> {
        let pattern = filter
            .keyword
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| format!("%{}%", escape_like(k)));

        let mut conditions = Vec::new();
        if filter.category_id != 0 {
            conditions.push("m.category_id = ?");
        }
        if pattern.is_some() {
            conditions.push("m.title LIKE ? ESCAPE '\\'");
        }
        let where_sql = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM materials m {}", where_sql);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if filter.category_id != 0 {
            count_query = count_query.bind(filter.category_id);
        }
        if let Some(p) = &pattern {
            count_query = count_query.bind(p.clone());
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let list_sql = format!(
            r#"
            SELECT m.*, c.title AS category_title
            FROM materials m
            LEFT JOIN material_categories c ON c.id = m.category_id
            {}
            ORDER BY m.id DESC
            LIMIT ? OFFSET ?
            "#,
            where_sql
        );
        let page_size = i64::from(filter.page_size.max(1));
        let offset = i64::from(filter.page.max(1) - 1) * page_size;

        let mut list_query = sqlx::query_as::<_, Material>(&list_sql);
        if filter.category_id != 0 {
            list_query = list_query.bind(filter.category_id);
        }
        if let Some(p) = &pattern {
            list_query = list_query.bind(p.clone());
        }
        let materials = list_query
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((materials, total))
    }

    /// Materials whose content hash matches, oldest first
    pub async fn find_materials_by_hash(&self, content_hash: &str) -> Result<Vec<Material>> {
        let materials = sqlx::query_as::<_, Material>(
            "SELECT * FROM materials WHERE content_hash = ? ORDER BY id",
        )
        .bind(content_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(materials)
    }

    /// First material whose title starts with `prefix`
    pub async fn find_material_by_title_prefix(&self, prefix: &str) -> Result<Option<Material>> {
        let material = sqlx::query_as::<_, Material>(
            "SELECT * FROM materials WHERE title LIKE ? ESCAPE '\\' ORDER BY id LIMIT 1",
        )
        .bind(format!("{}%", escape_like(prefix)))
        .fetch_optional(&self.pool)
        .await?;
        Ok(material)
    }

    /// Material imported from `origin_url`
    pub async fn find_material_by_origin_url(&self, origin_url: &str) -> Result<Option<Material>> {
        let material = sqlx::query_as::<_, Material>(
            "SELECT * FROM materials WHERE origin_url = ? ORDER BY id LIMIT 1",
        )
        .bind(origin_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(material)
    }

    /// Materials tagged with exactly `keyword`
    pub async fn list_materials_by_keyword(&self, keyword: &str) -> Result<Vec<Material>> {
        let materials =
            sqlx::query_as::<_, Material>("SELECT * FROM materials WHERE keyword = ? ORDER BY id")
                .bind(keyword)
                .fetch_all(&self.pool)
                .await?;
        Ok(materials)
    }

    /// Materials flagged for automatic propagation
    pub async fn list_auto_update_materials(&self) -> Result<Vec<Material>> {
        let materials = sqlx::query_as::<_, Material>(
            "SELECT * FROM materials WHERE auto_update = 1 AND status = ? ORDER BY id",
        )
        .bind(STATUS_ACTIVE)
        .fetch_all(&self.pool)
        .await?;
        Ok(materials)
    }

    // ===== Usage Ledger Operations =====

    /// Ledger rows for a material
    pub async fn list_usages_for_material(&self, material_id: i64) -> Result<Vec<MaterialUsage>> {
        let usages = sqlx::query_as::<_, MaterialUsage>(
            "SELECT * FROM material_usages WHERE material_id = ? ORDER BY id",
        )
        .bind(material_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(usages)
    }

    /// Ledger rows for a document
    pub async fn list_usages_for_item(
        &self,
        item_type: &str,
        item_id: i64,
    ) -> Result<Vec<MaterialUsage>> {
        let usages = sqlx::query_as::<_, MaterialUsage>(
            "SELECT * FROM material_usages WHERE item_type = ? AND item_id = ? ORDER BY id",
        )
        .bind(item_type)
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(usages)
    }

    /// Whether a ledger row exists
    pub async fn usage_exists(&self, material_id: i64, item_type: &str, item_id: i64) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM material_usages WHERE material_id = ? AND item_type = ? AND item_id = ?",
        )
        .bind(material_id)
        .bind(item_type)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Insert a ledger row; returns false if it already existed
    pub async fn insert_usage(&self, material_id: i64, item_type: &str, item_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO material_usages (material_id, item_type, item_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(material_id, item_type, item_id) DO NOTHING
            "#,
        )
        .bind(material_id)
        .bind(item_type)
        .bind(item_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a document's ledger rows for materials not in `keep`.
    ///
    /// Returns the material ids whose rows were removed.
    pub async fn prune_usages_for_item(
        &self,
        item_type: &str,
        item_id: i64,
        keep: &[i64],
    ) -> Result<Vec<i64>> {
        let placeholders = keep.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let filter = if keep.is_empty() {
            String::new()
        } else {
            format!(" AND material_id NOT IN ({})", placeholders)
        };

        let select_sql = format!(
            "SELECT material_id FROM material_usages WHERE item_type = ? AND item_id = ?{}",
            filter
        );
        let mut select = sqlx::query_scalar::<_, i64>(&select_sql)
            .bind(item_type)
            .bind(item_id);
        for id in keep {
            select = select.bind(*id);
        }
        let stale: Vec<i64> = select.fetch_all(&self.pool).await?;

        if stale.is_empty() {
            return Ok(stale);
        }

        let delete_sql = format!(
            "DELETE FROM material_usages WHERE item_type = ? AND item_id = ?{}",
            filter
        );
        let mut delete = sqlx::query(&delete_sql).bind(item_type).bind(item_id);
        for id in keep {
            delete = delete.bind(*id);
        }
        delete.execute(&self.pool).await?;

        Ok(stale)
    }

    /// Delete every ledger row of a material
    pub async fn delete_usages_for_material(&self, material_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM material_usages WHERE material_id = ?")
            .bind(material_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Live ledger row count for a material
    pub async fn count_usages(&self, material_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM material_usages WHERE material_id = ?")
            .bind(material_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Re-count ledger rows for a material and store the result
    pub async fn recompute_use_count(&self, material_id: i64) -> Result<i64> {
        let count = self.count_usages(material_id).await?;
        sqlx::query("UPDATE materials SET use_count = ? WHERE id = ?")
            .bind(count)
            .bind(material_id)
            .execute(&self.pool)
            .await?;
        debug!(material_id, count, "Recomputed material use count");
        Ok(count)
    }

    // ===== Document Operations =====

    /// Get a stored document
    pub async fn get_document(&self, item_type: &str, item_id: i64) -> Result<Option<DocumentRecord>> {
        let doc = sqlx::query_as::<_, DocumentRecord>(
            "SELECT * FROM documents WHERE item_type = ? AND item_id = ?",
        )
        .bind(item_type)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(doc)
    }

    /// Insert or update a document, bumping its revision
    pub async fn put_document(&self, item_type: &str, item_id: i64, content: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (item_type, item_id, content, revision, updated_at)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT(item_type, item_id) DO UPDATE SET
                content = excluded.content,
                revision = documents.revision + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(item_type)
        .bind(item_id)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ===== Statistics =====

    /// Get global statistics
    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        let category_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM material_categories")
            .fetch_one(&self.pool)
            .await?;

        let material_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM materials")
            .fetch_one(&self.pool)
            .await?;

        let usage_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM material_usages")
            .fetch_one(&self.pool)
            .await?;

        let document_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        Ok(GlobalStats {
            category_count: category_count as usize,
            material_count: material_count as usize,
            usage_count: usage_count as usize,
            document_count: document_count as usize,
        })
    }
}

#[async_trait]
impl DocumentStore for MetaDb {
    async fn load_content(&self, item_type: &str, item_id: i64) -> Result<Option<String>> {
        Ok(self
            .get_document(item_type, item_id)
            .await?
            .map(|doc| doc.content))
    }

    async fn store_content(&self, item_type: &str, item_id: i64, content: &str) -> Result<()> {
        self.put_document(item_type, item_id, content).await
    }
}

#[cfg(test)]
pub(crate) async fn setup_test_db() -> (MetaDb, tempfile::TempDir) {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut config = Config::default();
    config.init_paths(Some(tmp.path().to_path_buf()));

    let db = MetaDb::connect(&config).await.unwrap();
    (db, tmp)
}
