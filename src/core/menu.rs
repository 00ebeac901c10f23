use std::collections::HashMap;
use std::path::Path;

use log::{error, info, warn};
use serde_json::Value;

use crate::error::ConfigError;

/// A priced dish, keyed by its canonical label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub code: String,
    pub price: u64,
}

/// Label to price table. Immutable once built, so it can be shared behind
/// an `Arc` and read from any loop without locking.
#[derive(Debug, Clone, Default)]
pub struct MenuCatalog {
    items: Vec<MenuItem>,
    index: HashMap<String, usize>,
}

/// Turn a human dish name ("Canh chua") into the label the classifier
/// emits ("CANH_CHUA").
pub fn canonical_label(name: &str) -> String {
    name.trim().replace(' ', "_").to_uppercase()
}

impl MenuCatalog {
    /// Load `{"MENU": [{"MON": "...", "GIA": 15000}, ...]}` from disk.
    ///
    /// Entries without a name or with a price that is not a non-negative
    /// integer are skipped and logged. A catalog with no surviving entries
    /// is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::MenuMissing(path.to_path_buf())
            } else {
                ConfigError::MenuUnreadable {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let catalog = Self::from_json(&raw)?;
        info!("Loaded {} menu items from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let doc: Value = serde_json::from_str(raw)?;
        let entries = doc
            .get("MENU")
            .and_then(Value::as_array)
            .ok_or(ConfigError::MenuListMissing)?;

        let mut parsed = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            match parse_entry(entry) {
                Some(item) => parsed.push(item),
                None => error!("Skipping malformed menu entry #{}: {}", i + 1, entry),
            }
        }

        let catalog = Self::from_entries(parsed);
        if catalog.is_empty() {
            return Err(ConfigError::MenuEmpty);
        }
        Ok(catalog)
    }

    /// Build from `(name, price)` pairs. Names are canonicalized; on a
    /// duplicate code the first entry is kept.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        let mut catalog = Self::default();
        for (name, price) in entries {
            let code = canonical_label(name.as_ref());
            if code.is_empty() {
                continue;
            }
            if catalog.index.contains_key(&code) {
                warn!("Duplicate menu code {}, keeping the first price", code);
                continue;
            }
            catalog.index.insert(code.clone(), catalog.items.len());
            catalog.items.push(MenuItem { code, price });
        }
        catalog
    }

    pub fn price_of(&self, label: &str) -> Option<u64> {
        self.index.get(label).map(|&i| self.items[i].price)
    }

    /// Menu entries in document order.
    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn parse_entry(entry: &Value) -> Option<(String, u64)> {
    let name = entry.get("MON")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let price = entry.get("GIA")?;
    let price = match price.as_u64() {
        Some(p) => p,
        // Accept 15000.0 but not 15000.5 or negatives
        None => {
            let f = price.as_f64()?;
            if f < 0.0 || f.fract() != 0.0 || f > u64::MAX as f64 {
                return None;
            }
            f as u64
        }
    };

    Some((name.to_string(), price))
}
