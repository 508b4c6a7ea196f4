// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! SQLite-backed catalog store

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{CatalogField, CatalogItem, CatalogStore};
use crate::{GalleristError, Result};

const ITEM_COLUMNS: &str = "id, name, enabled, primary_art, detail_art";

/// Catalog database (thread-safe wrapper)
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    /// Open or create the catalog
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory catalog (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| GalleristError::Config("Catalog lock poisoned".to_string()))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                enabled INTEGER NOT NULL DEFAULT 1,
                primary_art TEXT NOT NULL DEFAULT '',
                detail_art TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_items_enabled ON items(enabled);
        "#)?;
        Ok(())
    }

    fn map_item(row: &Row<'_>) -> rusqlite::Result<CatalogItem> {
        Ok(CatalogItem {
            id: row.get(0)?,
            name: row.get(1)?,
            enabled: row.get(2)?,
            primary_art: row.get(3)?,
            detail_art: row.get(4)?,
        })
    }

    /// Insert an item, or overwrite every field of the item with that name
    pub fn upsert(&self, item: &CatalogItem) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT INTO items (name, enabled, primary_art, detail_art) VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(name) DO UPDATE SET
                   enabled = excluded.enabled,
                   primary_art = excluded.primary_art,
                   detail_art = excluded.detail_art"#,
            params![item.name, item.enabled, item.primary_art, item.detail_art],
        )?;
        let id = conn.query_row("SELECT id FROM items WHERE name = ?1", params![item.name], |row| row.get(0))?;
        Ok(id)
    }

    /// Look up an item by name
    pub fn find(&self, name: &str) -> Result<Option<CatalogItem>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM items WHERE name = ?1", ITEM_COLUMNS);
        conn.query_row(&sql, params![name], Self::map_item)
            .optional()
            .map_err(Into::into)
    }

    /// All items in catalog order, optionally only enabled ones
    pub fn list(&self, enabled_only: bool) -> Result<Vec<CatalogItem>> {
        let conn = self.lock_conn()?;
        let sql = if enabled_only {
            format!("SELECT {} FROM items WHERE enabled = 1 ORDER BY id", ITEM_COLUMNS)
        } else {
            format!("SELECT {} FROM items ORDER BY id", ITEM_COLUMNS)
        };
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt.query_map([], Self::map_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Write selected fields of the item with the same name
    pub fn update_fields(&self, item: &CatalogItem, fields: &[CatalogField]) -> Result<()> {
        let conn = self.lock_conn()?;
        for field in fields {
            let changed = match field {
                CatalogField::Enabled => conn.execute(
                    "UPDATE items SET enabled = ?1 WHERE name = ?2",
                    params![item.enabled, item.name],
                )?,
                CatalogField::Art(slot) => {
                    let sql = format!("UPDATE items SET {} = ?1 WHERE name = ?2", slot.column());
                    conn.execute(&sql, params![item.art(*slot), item.name])?
                }
            };
            if changed == 0 {
                return Err(GalleristError::NotFound(format!("{} doesn't exist", item.name)));
            }
        }
        Ok(())
    }

    /// Number of items
    pub fn count(&self) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .map_err(Into::into)
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn get(&self, name: &str) -> Result<Option<CatalogItem>> {
        self.find(name)
    }

    async fn list_enabled(&self) -> Result<Vec<CatalogItem>> {
        self.list(true)
    }

    async fn save(&self, item: &CatalogItem, fields: &[CatalogField]) -> Result<()> {
        self.update_fields(item, fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ArtSlot;

    fn seeded() -> SqliteCatalog {
        let db = SqliteCatalog::in_memory().unwrap();
        db.upsert(&CatalogItem::new("Fox", "/fox.png")).unwrap();
        let mut owl = CatalogItem::new("Owl", "/owl.png");
        owl.enabled = false;
        db.upsert(&owl).unwrap();
        db.upsert(&CatalogItem::new("Bee", "/bee.png")).unwrap();
        db
    }

    #[tokio::test]
    async fn test_list_enabled_keeps_catalog_order() {
        let db = seeded();
        let names: Vec<_> = db.list_enabled().await.unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["Fox", "Bee"]);
        assert_eq!(db.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_save_touches_only_named_fields() {
        let db = seeded();
        let mut fox = db.get("Fox").await.unwrap().unwrap();
        fox.set_art(ArtSlot::Primary, "/fox-1.png");
        fox.set_art(ArtSlot::Detail, "/not-saved.png");
        fox.enabled = false;

        db.save(&fox, &[CatalogField::Art(ArtSlot::Primary)]).await.unwrap();

        let stored = db.get("Fox").await.unwrap().unwrap();
        assert_eq!(stored.primary_art, "/fox-1.png");
        assert_eq!(stored.detail_art, "");
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn test_save_unknown_item() {
        let db = seeded();
        let ghost = CatalogItem::new("Ghost", "/ghost.png");
        let err = db.save(&ghost, &[CatalogField::Enabled]).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(db.get("Ghost").await.unwrap().is_none());
    }

    #[test]
    fn test_upsert_overwrites_existing() {
        let db = seeded();
        let id = db.find("Fox").unwrap().unwrap().id;
        let replaced = db.upsert(&CatalogItem::new("Fox", "/fox-new.png")).unwrap();
        assert_eq!(id, replaced);
        assert_eq!(db.find("Fox").unwrap().unwrap().primary_art, "/fox-new.png");
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");
        SqliteCatalog::open(&path).unwrap().upsert(&CatalogItem::new("Fox", "/fox.png")).unwrap();
        assert_eq!(SqliteCatalog::open(&path).unwrap().count().unwrap(), 1);
    }
}
