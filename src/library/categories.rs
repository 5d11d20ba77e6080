//! Material category operations

use super::MaterialLibrary;
use crate::error::{Error, Result};
use crate::meta::{MaterialCategory, STATUS_ACTIVE};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Create or rename request for a category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryRequest {
    #[serde(default)]
    pub id: Option<i64>,
    pub title: String,
}

impl CategoryRequest {
    pub fn new(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
        }
    }
}

impl MaterialLibrary {
    /// Active categories ordered by id
    pub async fn list_categories(&self) -> Result<Vec<MaterialCategory>> {
        self.db.list_categories().await
    }

    pub async fn get_category(&self, id: i64) -> Result<MaterialCategory> {
        self.db
            .get_category(id)
            .await?
            .ok_or_else(|| Error::CategoryNotFound(id.to_string()))
    }

    /// Create a category, or rename an existing one (which also reactivates it)
    pub async fn save_category(&self, req: CategoryRequest) -> Result<MaterialCategory> {
        let title = req.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidRequest(
                "category title must not be empty".to_string(),
            ));
        }

        match req.id.filter(|id| *id > 0) {
            Some(id) => {
                let mut category = self.get_category(id).await?;
                category.title = title.to_string();
                category.status = STATUS_ACTIVE;
                self.db.update_category(&category).await?;
                info!(id, title = %category.title, "Updated material category");
                Ok(category)
            }
            None => {
                let mut category = MaterialCategory::new(title.to_string());
                category.id = self.db.insert_category(&category).await?;
                info!(id = category.id, title = %category.title, "Created material category");
                Ok(category)
            }
        }
    }

    /// Delete a category that no live material references
    pub async fn delete_category(&self, id: i64) -> Result<()> {
        let category = self.get_category(id).await?;

        let materials = self.db.count_live_materials(category.id).await?;
        if materials > 0 {
            return Err(Error::CategoryInUse { id, materials });
        }

        self.db.delete_category(id).await?;
        info!(id, "Deleted material category");
        Ok(())
    }
}
