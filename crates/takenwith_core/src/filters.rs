use std::collections::BTreeSet;

use anyhow::Result;
use tracing::{debug, info};

use crate::api::WikiApi;
use crate::camera::check_exif_fields;
use crate::catcounts::CategoryCountCache;
use crate::mapping::{CATEGORY_PREFIX, CategoryRules, KnownCategorySet, MappedTarget};
use crate::record::FileRecord;
use crate::stats::RunStats;

#[derive(Debug, Clone)]
pub struct MembershipOptions {
    /// Prefix of category names that look bot-managed.
    pub bot_prefix: String,
    /// Only an exact target match stops the edit.
    pub ignore_existing: bool,
    /// Category being emptied in move mode; never counts as a match.
    pub move_from: Option<String>,
}

/// Set each record's target category from its camera. Files without camera
/// data are warned and `skip` mappings drop out silently; unmapped cameras
/// stay unresolved until the membership check.
pub fn resolve_categories(records: &mut [FileRecord], rules: &CategoryRules, stats: &mut RunStats) {
    for record in records.iter_mut().filter(|record| !record.is_processed()) {
        if !record.has_camera() {
            record.reject("No camera details in Exif");
            continue;
        }
        stats.with_camera += 1;

        match rules.resolve(&record.camera) {
            Some(MappedTarget::Category(category)) => record.category = category.clone(),
            Some(MappedTarget::Skip(note)) => {
                debug!(title = %record.title, note = %note, "camera mapped to skip");
                stats.skipped += 1;
                record.mark_processed();
            }
            Some(MappedTarget::Disambiguate(rule)) => {
                let exif = check_exif_fields(record.exif_source());
                record.category = rule.resolve(&exif).to_string();
                debug!(
                    title = %record.title,
                    rule = rule.name(),
                    iso = exif.has_iso_speed,
                    year = exif.year,
                    category = %record.category,
                    "disambiguated"
                );
            }
            None => {}
        }
    }
}

/// Drop files whose target category is missing or already holds `limit`
/// files. A limit of zero disables the check.
pub fn apply_quota<A: WikiApi>(
    records: &mut [FileRecord],
    cache: &mut CategoryCountCache,
    api: &mut A,
    limit: i32,
    stats: &mut RunStats,
) -> Result<()> {
    if limit <= 0 {
        return Ok(());
    }

    let uncached = records
        .iter()
        .filter(|record| !record.is_processed() && !record.category.is_empty())
        .map(|record| record.category.as_str())
        .filter(|category| cache.get(category).is_none())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    cache.refresh(&uncached, api)?;

    for record in records
        .iter_mut()
        .filter(|record| !record.is_processed() && !record.category.is_empty())
    {
        match cache.get(&record.category) {
            None => {
                let message = format!("Mapped category doesn't exist: {}", record.category);
                record.reject(message);
            }
            Some(count) if count >= limit => {
                debug!(title = %record.title, category = %record.category, count, "already populated");
                stats.populated += 1;
                record.mark_processed();
            }
            Some(0) => {
                stats.empty_targets += 1;
                info!(
                    title = %record.title,
                    category = %record.category,
                    "adding to empty category, possibly a redirect"
                );
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Check current categories of the remaining files in one lookup.
pub fn apply_membership<A: WikiApi>(
    records: &mut [FileRecord],
    api: &mut A,
    known: &KnownCategorySet,
    options: &MembershipOptions,
    stats: &mut RunStats,
) -> Result<()> {
    let titles = records
        .iter()
        .filter(|record| !record.is_processed())
        .map(|record| record.title.clone())
        .collect::<Vec<_>>();
    if titles.is_empty() {
        return Ok(());
    }
    let current = api.page_categories(&titles)?;

    for record in records.iter_mut().filter(|record| !record.is_processed()) {
        let Some(categories) = current.get(&record.title) else {
            record.reject("File does not exist, possibly deleted.");
            continue;
        };

        for category in categories {
            if options.move_from.as_deref() == Some(category.as_str()) {
                continue;
            }
            if *category == record.category {
                stats.in_category += 1;
                record.mark_processed();
                break;
            }
            if options.ignore_existing {
                continue;
            }
            if known.contains(category) {
                debug!(title = %record.title, category = %category, "already in a known category");
                record.mark_processed();
                break;
            }
            if category.starts_with(&options.bot_prefix) {
                let prefix = options
                    .bot_prefix
                    .strip_prefix(CATEGORY_PREFIX)
                    .unwrap_or(&options.bot_prefix);
                record.reject(format!("Already in an unknown '{prefix}': {category}"));
                break;
            }
        }

        if !record.is_processed() && record.category.is_empty() {
            let message = format!(
                "No category for {},{}",
                record.camera.make, record.camera.model
            );
            record.reject(message);
        }
    }
    Ok(())
}
