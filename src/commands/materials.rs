//! Material and category commands

use crate::error::{Error, Result};
use crate::library::{CategoryRequest, ImportReport, MaterialLibrary, MaterialPage, MaterialRequest};
use crate::meta::{Material, MaterialCategory, MaterialUsage};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::info;

/// A material with the documents embedding it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialDetail {
    pub material: Material,
    pub usages: Vec<MaterialUsage>,
}

/// How `material find` looks a material up
#[derive(Debug, Clone)]
pub enum FindBy {
    TitlePrefix(String),
    OriginUrl(String),
    Keyword(String),
}

/// Read HTML from `--content`, or from a file (`-` for stdin)
pub fn read_content(content: Option<String>, file: Option<&Path>) -> Result<String> {
    match (content, file) {
        (Some(content), _) => Ok(content),
        (None, Some(path)) if path == Path::new("-") => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        (None, Some(path)) => Ok(std::fs::read_to_string(path)?),
        (None, None) => Err(Error::InvalidRequest(
            "pass --content or --file".to_string(),
        )),
    }
}

pub async fn cmd_list_materials(
    lib: &MaterialLibrary,
    category_id: i64,
    keyword: Option<&str>,
    page: u32,
    page_size: u32,
) -> Result<MaterialPage> {
    info!("Listing materials");
    lib.list_materials(category_id, keyword, page, page_size)
        .await
}

pub async fn cmd_show_material(lib: &MaterialLibrary, id: i64) -> Result<MaterialDetail> {
    let material = lib.get_material(id).await?;
    let usages = lib.db().list_usages_for_material(id).await?;
    Ok(MaterialDetail { material, usages })
}

pub async fn cmd_save_material(lib: &MaterialLibrary, req: MaterialRequest) -> Result<Material> {
    lib.save_material(req).await
}

pub async fn cmd_delete_material(lib: &MaterialLibrary, id: i64) -> Result<()> {
    lib.delete_material(id).await
}

/// Import a JSON array of material requests
pub async fn cmd_import_materials(lib: &MaterialLibrary, path: &Path) -> Result<ImportReport> {
    info!("Importing materials from {:?}", path);
    let raw = std::fs::read_to_string(path)?;
    let requests: Vec<MaterialRequest> = serde_json::from_str(&raw)?;
    lib.bulk_import(requests).await
}

pub async fn cmd_find_materials(lib: &MaterialLibrary, by: FindBy) -> Result<Vec<Material>> {
    match by {
        FindBy::TitlePrefix(title) => Ok(vec![lib.find_by_title_prefix(&title).await?]),
        FindBy::OriginUrl(url) => Ok(vec![lib.find_by_origin_url(&url).await?]),
        FindBy::Keyword(keyword) => lib.find_all_by_keyword(&keyword).await,
    }
}

pub async fn cmd_list_categories(lib: &MaterialLibrary) -> Result<Vec<MaterialCategory>> {
    lib.list_categories().await
}

pub async fn cmd_save_category(
    lib: &MaterialLibrary,
    id: Option<i64>,
    title: String,
) -> Result<MaterialCategory> {
    lib.save_category(CategoryRequest { id, title }).await
}

pub async fn cmd_delete_category(lib: &MaterialLibrary, id: i64) -> Result<()> {
    lib.delete_category(id).await
}

/// Print a listing page
pub fn print_material_page(page: &MaterialPage) {
    println!(
        "\n🧩 Materials (page {}, {} total)\n",
        page.page, page.total
    );

    if page.items.is_empty() {
        println!("No materials found.");
        return;
    }

    for material in &page.items {
        print_material_line(material);
    }
}

fn print_material_line(material: &Material) {
    let category = material
        .category_title
        .as_deref()
        .unwrap_or(if material.category_id == 0 {
            "uncategorized"
        } else {
            "?"
        });
    let auto = if material.auto_update { " ⟳" } else { "" };
    println!(
        "• #{} {}{} [{}] used {}×",
        material.id, material.title, auto, category, material.use_count
    );
}

pub fn print_materials(materials: &[Material]) {
    if materials.is_empty() {
        println!("No materials found.");
        return;
    }
    for material in materials {
        print_material_line(material);
    }
}

pub fn print_material_detail(detail: &MaterialDetail) {
    let m = &detail.material;
    println!("\n🧩 Material #{}\n", m.id);
    println!("Title: {}", m.title);
    println!("Category: {}", m.category_id);
    println!("Auto update: {}", if m.auto_update { "yes" } else { "no" });
    println!("Fingerprint: {}", m.content_hash);
    if !m.origin_url.is_empty() {
        println!("Origin: {}", m.origin_url);
    }
    if !m.keyword.is_empty() {
        println!("Keyword: {}", m.keyword);
    }
    println!("Updated: {}", m.updated_at);
    println!("\nContent:\n{}", m.content);

    println!("\nEmbedded in {} document(s):", detail.usages.len());
    for usage in &detail.usages {
        println!("  {} #{}", usage.item_type, usage.item_id);
    }
}

pub fn print_import_report(report: &ImportReport) {
    println!("\n✓ Import complete");
    println!("  Created: {}", report.created);
    println!("  Updated: {}", report.updated);
    println!("  Deduplicated: {}", report.deduplicated);
    println!("  Skipped: {}", report.skipped);
    println!("  Categories recounted: {}", report.categories_recounted);
}

pub fn print_categories(categories: &[MaterialCategory]) {
    println!("\n🗂  Material Categories\n");

    if categories.is_empty() {
        println!("No categories yet. Use 'quarry category save <title>' to add one.");
        return;
    }

    for category in categories {
        println!(
            "• #{} {} ({} material(s))",
            category.id, category.title, category.material_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::setup_test_library;
    use tempfile::TempDir;

    #[test]
    fn test_read_content_prefers_inline() {
        assert_eq!(
            read_content(Some("<p>x</p>".to_string()), None).unwrap(),
            "<p>x</p>"
        );
        assert!(read_content(None, None).is_err());
    }

    #[tokio::test]
    async fn test_import_from_json_file() {
        let (lib, _tmp) = setup_test_library().await;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("materials.json");
        std::fs::write(
            &path,
            r#"[
                {"content": "<p>one</p>", "keyword": "k"},
                {"title": "Two", "content": "<p>two</p>", "auto_update": true},
                {"content": "<p>one</p>"}
            ]"#,
        )
        .unwrap();

        let report = cmd_import_materials(&lib, &path).await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.deduplicated, 1);

        let found = cmd_find_materials(&lib, FindBy::TitlePrefix("Two".to_string()))
            .await
            .unwrap();
        assert!(found[0].auto_update);
    }
}
