use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bincode::serde::{decode_from_slice, encode_to_vec};
use tracing::debug;

use crate::api::WikiApi;

/// Persisted category populations. Counts are advisory: another process may
/// rewrite the file at any time and the last writer wins.
#[derive(Debug, Clone)]
pub struct CategoryCountCache {
    path: PathBuf,
    counts: BTreeMap<String, i32>,
}

impl CategoryCountCache {
    /// Load the cache file. A missing file yields an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        let counts = if path.exists() {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let (counts, _) =
                decode_from_slice::<BTreeMap<String, i32>, _>(&bytes, bincode::config::standard())
                    .with_context(|| format!("failed to decode {}", path.display()))?;
            counts
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            counts,
        })
    }

    /// Forget every count below `limit` so those categories are looked up
    /// again. Returns how many entries were dropped.
    pub fn evict_below(&mut self, limit: i32) -> usize {
        let before = self.counts.len();
        self.counts.retain(|_, count| *count >= limit);
        before - self.counts.len()
    }

    pub fn get(&self, category: &str) -> Option<i32> {
        self.counts.get(category).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Look up all `categories` in one bulk request and merge the results.
    /// Categories that don't exist remotely stay absent.
    pub fn refresh<A: WikiApi>(&mut self, categories: &[String], api: &mut A) -> Result<()> {
        if categories.is_empty() {
            return Ok(());
        }
        let fetched = api
            .category_file_counts(categories)
            .context("failed to look up category populations")?;
        debug!(
            requested = categories.len(),
            found = fetched.len(),
            "refreshed category counts"
        );
        for (category, count) in fetched {
            self.counts.insert(category, count.max(0));
        }
        self.persist()
    }

    pub fn increment(&mut self, category: &str) -> Result<()> {
        let count = self.counts.entry(category.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let bytes = encode_to_vec(&self.counts, bincode::config::standard())
            .context("failed to encode category counts")?;
        let mut temp_name = self.path.as_os_str().to_os_string();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);
        fs::write(&temp_path, bytes)
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "failed to move {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::tempdir;

    use super::CategoryCountCache;
    use crate::api::testing::MockApi;

    #[test]
    fn missing_file_loads_empty() {
        let temp = tempdir().expect("tempdir");
        let cache = CategoryCountCache::load(&temp.path().join("catcounts")).expect("load");
        assert!(cache.is_empty());
        assert_eq!(cache.get("Category:X"), None);
    }

    #[test]
    fn counts_survive_reload_and_eviction() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("catcounts");
        let mut api = MockApi {
            category_counts: BTreeMap::from([("Category:X".to_string(), 5)]),
            ..MockApi::default()
        };

        let mut cache = CategoryCountCache::load(&path).expect("load");
        cache
            .refresh(&["Category:X".to_string()], &mut api)
            .expect("refresh");
        assert!(path.exists());
        assert!(!temp.path().join("catcounts.tmp").exists());

        let mut reloaded = CategoryCountCache::load(&path).expect("reload");
        assert_eq!(reloaded.get("Category:X"), Some(5));

        assert_eq!(reloaded.evict_below(10), 1);
        assert_eq!(reloaded.get("Category:X"), None);
    }

    #[test]
    fn refresh_leaves_unknown_categories_absent() {
        let temp = tempdir().expect("tempdir");
        let mut api = MockApi {
            category_counts: BTreeMap::from([
                ("Category:Present".to_string(), 3),
                ("Category:Negative".to_string(), -2),
            ]),
            ..MockApi::default()
        };
        let mut cache = CategoryCountCache::load(&temp.path().join("catcounts")).expect("load");
        cache
            .refresh(
                &[
                    "Category:Present".to_string(),
                    "Category:Gone".to_string(),
                    "Category:Negative".to_string(),
                ],
                &mut api,
            )
            .expect("refresh");

        assert_eq!(cache.get("Category:Present"), Some(3));
        assert_eq!(cache.get("Category:Gone"), None);
        assert_eq!(cache.get("Category:Negative"), Some(0));
        assert_eq!(api.count_lookups.len(), 1);
    }

    #[test]
    fn increment_persists_new_count() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("catcounts");
        let mut cache = CategoryCountCache::load(&path).expect("load");
        cache.increment("Category:Y").expect("increment");
        cache.increment("Category:Y").expect("increment");

        let reloaded = CategoryCountCache::load(&path).expect("reload");
        assert_eq!(reloaded.get("Category:Y"), Some(2));
    }
}
