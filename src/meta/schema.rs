//! SQLite schema definition

/// SQL schema for the material database
pub const SCHEMA_SQL: &str = r#"
-- Material categories
CREATE TABLE IF NOT EXISTS material_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 1,
    material_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Materials: reusable HTML snippets
CREATE TABLE IF NOT EXISTS materials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    category_id INTEGER NOT NULL DEFAULT 0,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    auto_update INTEGER NOT NULL DEFAULT 0,
    use_count INTEGER NOT NULL DEFAULT 0,
    status INTEGER NOT NULL DEFAULT 1,
    origin_url TEXT NOT NULL DEFAULT '',
    keyword TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Material usages: which documents embed which materials
CREATE TABLE IF NOT EXISTS material_usages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    material_id INTEGER NOT NULL,
    item_type TEXT NOT NULL,
    item_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(material_id, item_type, item_id)
);

-- Documents: stored content of embedding documents
CREATE TABLE IF NOT EXISTS documents (
    item_type TEXT NOT NULL,
    item_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL,
    PRIMARY KEY(item_type, item_id)
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_materials_category ON materials(category_id);
CREATE INDEX IF NOT EXISTS idx_materials_hash ON materials(content_hash);
CREATE INDEX IF NOT EXISTS idx_materials_title ON materials(title);
CREATE INDEX IF NOT EXISTS idx_materials_origin ON materials(origin_url);
CREATE INDEX IF NOT EXISTS idx_materials_keyword ON materials(keyword);
CREATE INDEX IF NOT EXISTS idx_usages_item ON material_usages(item_type, item_id);
"#;
