// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Catalog of collectibles and their art slots

pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Result;

pub use sqlite::SqliteCatalog;

/// A named art attribute on a catalog item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtSlot {
    /// Spawn artwork, shown in the gallery thread
    Primary,
    /// Card / detail artwork
    Detail,
}

impl ArtSlot {
    pub const ALL: [ArtSlot; 2] = [ArtSlot::Primary, ArtSlot::Detail];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtSlot::Primary => "primary",
            ArtSlot::Detail => "detail",
        }
    }

    /// Column holding this slot in the catalog table
    pub(crate) fn column(&self) -> &'static str {
        match self {
            ArtSlot::Primary => "primary_art",
            ArtSlot::Detail => "detail_art",
        }
    }
}

impl fmt::Display for ArtSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtSlot {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" | "spawn" | "wild" => Ok(ArtSlot::Primary),
            "detail" | "card" => Ok(ArtSlot::Detail),
            other => Err(format!("unknown art slot `{}` (expected primary or detail)", other)),
        }
    }
}

/// One collectible
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub primary_art: String,
    pub detail_art: String,
}

impl CatalogItem {
    pub fn new(name: impl Into<String>, primary_art: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            enabled: true,
            primary_art: primary_art.into(),
            detail_art: String::new(),
        }
    }

    /// Stored path for `slot`; empty when unset
    pub fn art(&self, slot: ArtSlot) -> &str {
        match slot {
            ArtSlot::Primary => &self.primary_art,
            ArtSlot::Detail => &self.detail_art,
        }
    }

    pub fn set_art(&mut self, slot: ArtSlot, path: impl Into<String>) {
        match slot {
            ArtSlot::Primary => self.primary_art = path.into(),
            ArtSlot::Detail => self.detail_art = path.into(),
        }
    }
}

/// Fields that can be saved individually
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogField {
    Enabled,
    Art(ArtSlot),
}

/// Persistence for catalog items
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Look up an item by its unique name
    async fn get(&self, name: &str) -> Result<Option<CatalogItem>>;

    /// Enabled items in catalog order
    async fn list_enabled(&self) -> Result<Vec<CatalogItem>>;

    /// Write only `fields` of `item`, matched by name
    async fn save(&self, item: &CatalogItem, fields: &[CatalogField]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_parsing() {
        assert_eq!("primary".parse::<ArtSlot>().unwrap(), ArtSlot::Primary);
        assert_eq!("Card".parse::<ArtSlot>().unwrap(), ArtSlot::Detail);
        assert!("banner".parse::<ArtSlot>().is_err());
    }

    #[test]
    fn test_art_accessors() {
        let mut item = CatalogItem::new("Fox", "/fox.png");
        assert_eq!(item.art(ArtSlot::Primary), "/fox.png");
        assert_eq!(item.art(ArtSlot::Detail), "");
        item.set_art(ArtSlot::Detail, "/fox-card.png");
        assert_eq!(item.art(ArtSlot::Detail), "/fox-card.png");
    }
}
