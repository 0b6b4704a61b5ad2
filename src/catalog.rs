//! Product metadata store.
//!
//! Records are loaded once, validated, and then shared read-only (`Arc`)
//! with the index snapshot and every search result.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A single catalog product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Unique product id (the image file name in the demo catalog)
    pub id: String,
    /// Display name
    pub name: String,
    /// Category label (e.g. "footwear")
    pub category: String,
    /// Primary colour
    pub color: String,
    /// Non-negative price
    pub price: f64,
    /// Free-text description
    pub description: String,
    /// Image location, relative to the images directory unless absolute or a URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl ProductRecord {
    /// Text indexed for the text modality.
    pub fn text_document(&self) -> String {
        format!(
            "{} - {} - {} - {}",
            self.name, self.description, self.color, self.category
        )
    }
}

/// Entry shape of the metadata file: `{ "<id>": { name, color, ... } }`.
#[derive(Debug, Deserialize)]
struct MetadataEntry {
    name: String,
    color: String,
    description: String,
    category: String,
    price: f64,
    #[serde(default)]
    image: Option<String>,
}

/// In-memory collection of product records.
#[derive(Debug, Default)]
pub struct MetadataStore {
    records: Vec<Arc<ProductRecord>>,
    by_id: HashMap<String, usize>,
}

impl MetadataStore {
    /// Build a store, rejecting duplicate ids and invalid prices.
    pub fn from_records(records: impl IntoIterator<Item = ProductRecord>) -> Result<Self> {
        let mut store = Self::default();
        for record in records {
            if record.id.trim().is_empty() {
                return Err(Error::InvalidArgument("product id must not be empty".into()));
            }
            if !record.price.is_finite() || record.price < 0.0 {
                return Err(Error::InvalidArgument(format!(
                    "product '{}' has invalid price {}",
                    record.id, record.price
                )));
            }
            if store.by_id.contains_key(&record.id) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate product id '{}'",
                    record.id
                )));
            }
            store.by_id.insert(record.id.clone(), store.records.len());
            store.records.push(Arc::new(record));
        }
        Ok(store)
    }

    /// Parse the metadata JSON document.
    ///
    /// Products are ordered by id. A missing `image` field defaults to the id,
    /// matching catalogs where the id is the image file name.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let entries: BTreeMap<String, MetadataEntry> = serde_json::from_str(raw)?;
        Self::from_records(entries.into_iter().map(|(id, entry)| ProductRecord {
            image_ref: Some(entry.image.unwrap_or_else(|| id.clone())),
            id,
            name: entry.name,
            category: entry.category,
            color: entry.color,
            price: entry.price,
            description: entry.description,
        }))
    }

    /// Load the metadata file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// All records in catalog order.
    pub fn records(&self) -> &[Arc<ProductRecord>] {
        &self.records
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<&Arc<ProductRecord>> {
        self.by_id.get(id).map(|&idx| &self.records[idx])
    }

    /// Catalog position of a record.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct categories, lower-cased.
    pub fn categories(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .map(|r| r.category.trim().to_lowercase())
            .collect()
    }

    /// Distinct colours, lower-cased.
    pub fn colors(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .map(|r| r.color.trim().to_lowercase())
            .collect()
    }
}
