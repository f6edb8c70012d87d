use std::ops::ControlFlow;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, error, info};

use crate::api::{Continuation, FilePage, FileQuery, RANDOM_BATCH_LIMIT, SortDirection, WikiApi};
use crate::camera::check_exif_fields;
use crate::catcounts::CategoryCountCache;
use crate::config::BotConfig;
use crate::disambiguate::DisambiguationRule;
use crate::editor::{EditResult, SafeEditor};
use crate::filters::{MembershipOptions, apply_membership, apply_quota, resolve_categories};
use crate::gallery::WarningGallery;
use crate::mapping::{CATEGORY_PREFIX, CategoryRules, KnownCategorySet};
use crate::reclassify::{MovePlan, plan_move};
use crate::record::FileRecord;
use crate::stats::RunStats;

pub const FILE_PREFIX: &str = "File:";
const DELETED_MESSAGE: &str = "File does not exist, possibly deleted.";

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub cat_file_limit: i32,
    pub batch_size: usize,
    pub max_files: usize,
    pub max_warnings: usize,
    pub gallery_page: Option<String>,
    pub min_edit_interval: Duration,
    pub membership: MembershipOptions,
}

impl RunSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            cat_file_limit: config.cat_file_limit(),
            batch_size: config.batch_size(),
            max_files: config.max_files(),
            max_warnings: config.max_warnings(),
            gallery_page: config.gallery_page().map(ToString::to_string),
            min_edit_interval: Duration::from_millis(config.min_edit_interval_ms()),
            membership: MembershipOptions {
                bot_prefix: config.bot_prefix().to_string(),
                ignore_existing: false,
                move_from: None,
            },
        }
    }
}

/// Upload timestamp in `YYYYMMDDHHMMSS` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.len() != 14 || !trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            bail!("invalid timestamp {value:?}: expected 14 digits (YYYYMMDDHHMMSS)");
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a run works through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    File {
        title: String,
    },
    /// A user's uploads, newest first.
    User {
        user: String,
        start: Option<Timestamp>,
    },
    Category {
        category: String,
        sortkey_prefix: Option<String>,
    },
    Random,
    /// All uploads in timestamp order.
    Sweep {
        direction: SortDirection,
        start: Option<Timestamp>,
    },
    /// Sort files out of the unidentified Canon holding categories.
    Reclassify,
}

impl WorkUnit {
    pub fn file(title: &str) -> Self {
        Self::File {
            title: with_prefix(title, FILE_PREFIX),
        }
    }

    pub fn user(user: &str, start: Option<&str>) -> Result<Self> {
        Ok(Self::User {
            user: user.trim().to_string(),
            start: start.map(Timestamp::parse).transpose()?,
        })
    }

    pub fn category(category: &str, sortkey_prefix: Option<&str>) -> Self {
        Self::Category {
            category: with_prefix(category, CATEGORY_PREFIX),
            sortkey_prefix: sortkey_prefix.map(ToString::to_string),
        }
    }

    pub fn sweep(direction: SortDirection, start: Option<&str>) -> Result<Self> {
        Ok(Self::Sweep {
            direction,
            start: start.map(Timestamp::parse).transpose()?,
        })
    }
}

fn with_prefix(name: &str, prefix: &str) -> String {
    let name = name.trim();
    if name.starts_with(prefix) {
        name.to_string()
    } else {
        format!("{prefix}{name}")
    }
}

/// State of one bot run. The warning gallery is published when the session
/// finishes or, failing that, when it is dropped.
pub struct Session<A: WikiApi> {
    api: A,
    rules: CategoryRules,
    known: KnownCategorySet,
    cache: CategoryCountCache,
    editor: SafeEditor,
    gallery: WarningGallery,
    stats: RunStats,
    settings: RunSettings,
    published: bool,
}

impl<A: WikiApi> Session<A> {
    pub fn new(
        api: A,
        rules: CategoryRules,
        known: KnownCategorySet,
        mut cache: CategoryCountCache,
        settings: RunSettings,
    ) -> Self {
        if settings.cat_file_limit > 0 {
            // Small counts may have grown since they were cached.
            let evicted = cache.evict_below(settings.cat_file_limit);
            debug!(evicted, kept = cache.len(), "evicted small category counts");
        }
        Self {
            api,
            rules,
            known,
            cache,
            editor: SafeEditor::new(settings.min_edit_interval),
            gallery: WarningGallery::default(),
            stats: RunStats::default(),
            settings,
            published: false,
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn run(&mut self, unit: &WorkUnit) -> Result<()> {
        let limit = self.settings.batch_size;
        match unit {
            WorkUnit::File { title } => {
                let pages = self.api.get_files(std::slice::from_ref(title))?;
                self.process_pages(pages)?;
            }
            WorkUnit::User { user, start } => {
                let query = FileQuery::Uploads {
                    user: user.clone(),
                    start: start.as_ref().map(|stamp| stamp.as_str().to_string()),
                    limit,
                };
                self.drive(&query, Self::process_pages)?;
            }
            WorkUnit::Category {
                category,
                sortkey_prefix,
            } => {
                let query = FileQuery::CategoryMembers {
                    category: category.clone(),
                    sortkey_prefix: sortkey_prefix.clone(),
                    limit,
                };
                self.drive(&query, Self::process_pages)?;
            }
            WorkUnit::Random => {
                let query = FileQuery::Random {
                    limit: limit.min(RANDOM_BATCH_LIMIT),
                };
                loop {
                    let batch = self.api.query_files(&query, None)?;
                    if batch.files.is_empty() {
                        break;
                    }
                    if self.process_pages(batch.files)?.is_break() {
                        break;
                    }
                }
            }
            WorkUnit::Sweep { direction, start } => {
                let query = FileQuery::AllFiles {
                    direction: *direction,
                    start: start.as_ref().map(|stamp| stamp.as_str().to_string()),
                    limit,
                };
                self.drive(&query, Self::process_pages)?;
            }
            WorkUnit::Reclassify => {
                for rule in DisambiguationRule::ALL {
                    let query = FileQuery::CategoryMembers {
                        category: rule.series().holding.to_string(),
                        sortkey_prefix: None,
                        limit,
                    };
                    let flow =
                        self.drive(&query, |session, pages| session.reclassify_pages(rule, pages))?;
                    if flow.is_break() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Publish the warning gallery. The statistics come back whether or not
    /// publishing succeeded.
    pub fn finish(mut self) -> (RunStats, Result<()>) {
        self.published = true;
        let published = self.publish_gallery();
        (self.stats, published)
    }

    fn publish_gallery(&mut self) -> Result<()> {
        let Some(page) = self.settings.gallery_page.as_deref() else {
            return Ok(());
        };
        self.gallery.publish(page, &mut self.editor, &mut self.api)
    }

    fn drive<F>(&mut self, query: &FileQuery, mut handle: F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&mut Self, Vec<FilePage>) -> Result<ControlFlow<()>>,
    {
        let mut continuation: Option<Continuation> = None;
        loop {
            let batch = self.api.query_files(query, continuation.as_ref())?;
            if handle(self, batch.files)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
            match batch.continuation {
                Some(next) => continuation = Some(next),
                None => return Ok(ControlFlow::Continue(())),
            }
        }
    }

    fn process_pages(&mut self, pages: Vec<FilePage>) -> Result<ControlFlow<()>> {
        let mut records = self.start_batch(pages);
        let outcome = self.process_records(&mut records);
        self.stats.warnings += self.gallery.append(&records);
        outcome?;
        debug!(files = records.len(), "batch processed");
        Ok(self.check_stop())
    }

    fn start_batch(&mut self, mut pages: Vec<FilePage>) -> Vec<FileRecord> {
        if self.settings.max_files > 0 {
            pages.truncate(self.settings.max_files.saturating_sub(self.stats.examined));
        }
        self.stats.examined += pages.len();
        pages
            .into_iter()
            .map(|page| {
                let missing = page.missing;
                let mut record = FileRecord::from_page(page);
                if missing {
                    record.reject(DELETED_MESSAGE);
                }
                record
            })
            .collect()
    }

    fn process_records(&mut self, records: &mut [FileRecord]) -> Result<()> {
        resolve_categories(records, &self.rules, &mut self.stats);
        apply_quota(
            records,
            &mut self.cache,
            &mut self.api,
            self.settings.cat_file_limit,
            &mut self.stats,
        )?;
        apply_membership(
            records,
            &mut self.api,
            &self.known,
            &self.settings.membership,
            &mut self.stats,
        )?;
        self.edit_pending(records)
    }

    fn edit_pending(&mut self, records: &mut [FileRecord]) -> Result<()> {
        let limit = self.settings.cat_file_limit;
        for record in records.iter_mut().filter(|record| !record.is_processed()) {
            // Earlier edits in this batch may have filled the category.
            if limit > 0
                && let Some(count) = self.cache.get(&record.category)
                && count >= limit
            {
                debug!(title = %record.title, category = %record.category, "already populated");
                self.stats.populated += 1;
                record.mark_processed();
                continue;
            }

            let result = match self.settings.membership.move_from.as_deref() {
                Some(from) => self.editor.move_category(
                    &mut self.api,
                    &record.title,
                    from,
                    &record.category,
                    None,
                ),
                None => self
                    .editor
                    .add_category(&mut self.api, &record.title, &record.category),
            };
            let result = match result {
                Ok(result) => result,
                Err(error) => {
                    record.warn(format!("Edit failed: {error:#}"));
                    return Err(error);
                }
            };
            record.mark_processed();
            self.record_edit(record, result)?;
        }
        Ok(())
    }

    fn record_edit(&mut self, record: &mut FileRecord, result: EditResult) -> Result<()> {
        match result {
            EditResult::Saved => {
                info!(title = %record.title, category = %record.category, "added to category");
                self.stats.edited += 1;
                // Only counts that came from the wiki are worth bumping.
                if self.settings.cat_file_limit > 0 && self.cache.get(&record.category).is_some() {
                    self.cache.increment(&record.category)?;
                }
            }
            EditResult::Unchanged => {
                debug!(title = %record.title, "edit left page unchanged");
            }
            EditResult::Protected(reason) => record.warn(format!("Page is protected: {reason}")),
            EditResult::Missing => record.warn(DELETED_MESSAGE),
        }
        Ok(())
    }

    fn reclassify_pages(
        &mut self,
        rule: DisambiguationRule,
        pages: Vec<FilePage>,
    ) -> Result<ControlFlow<()>> {
        let mut records = self.start_batch(pages);
        let outcome = self.reclassify_records(rule, &mut records);
        self.stats.warnings += self.gallery.append(&records);
        outcome?;
        Ok(self.check_stop())
    }

    fn reclassify_records(
        &mut self,
        rule: DisambiguationRule,
        records: &mut [FileRecord],
    ) -> Result<()> {
        let holding = rule.series().holding;
        for record in records.iter_mut().filter(|record| !record.is_processed()) {
            if record.has_camera() {
                self.stats.with_camera += 1;
            }
            let exif = check_exif_fields(record.exif_source());
            match plan_move(&record.camera, &exif, rule) {
                MovePlan::WrongModel => record.reject("Skipping due to wrong model in Exif"),
                MovePlan::Keep => {
                    debug!(title = %record.title, "still undecidable");
                    record.mark_processed();
                }
                MovePlan::Move { target, reason } => {
                    record.category = target.to_string();
                    let result = match self.editor.move_category(
                        &mut self.api,
                        &record.title,
                        holding,
                        target,
                        Some(reason),
                    ) {
                        Ok(result) => result,
                        Err(error) => {
                            record.warn(format!("Edit failed: {error:#}"));
                            return Err(error);
                        }
                    };
                    record.mark_processed();
                    self.record_edit(record, result)?;
                }
            }
        }
        Ok(())
    }

    fn check_stop(&self) -> ControlFlow<()> {
        let settings = &self.settings;
        if settings.max_files > 0 && self.stats.examined >= settings.max_files {
            info!(examined = self.stats.examined, "file limit reached");
            return ControlFlow::Break(());
        }
        if settings.max_warnings > 0 && self.stats.warnings >= settings.max_warnings {
            info!(warnings = self.stats.warnings, "warning limit reached");
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

impl<A: WikiApi> Drop for Session<A> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        self.published = true;
        if let Err(err) = self.publish_gallery() {
            error!("failed to publish warning gallery: {err:#}");
        }
    }
}
