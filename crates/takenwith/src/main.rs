use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use takenwith_core::api::{MediaWikiClient, MediaWikiClientConfig, SortDirection, WikiApi};
use takenwith_core::catcounts::CategoryCountCache;
use takenwith_core::config::load_config;
use takenwith_core::mapping::{CategoryRules, KnownCategorySet, load_exceptions};
use takenwith_core::pipeline::{RunSettings, Session, WorkUnit};
use takenwith_core::runtime::{PathOverrides, ResolutionContext, ResolvedPaths, resolve_paths};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "takenwith",
    version,
    about = "Add media files to \"Taken with\" camera categories based on their Exif data"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Directory holding catmapping and friends")]
    work_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Log every decision")]
    verbose: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(flatten)]
    run: RunArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(
        long,
        global = true,
        value_name = "N",
        help = "Don't add to categories with at least this many files (0 = no limit)"
    )]
    cat_file_limit: Option<i32>,
    #[arg(long, global = true, value_name = "N", help = "Files per server request")]
    batch_size: Option<usize>,
    #[arg(long, global = true, value_name = "N", help = "Stop after examining this many files")]
    max_files: Option<usize>,
    #[arg(long, global = true, value_name = "N", help = "Stop after this many warnings")]
    max_warnings: Option<usize>,
    #[arg(long, global = true, value_name = "TITLE", help = "Page to rewrite with warned files")]
    gallery_page: Option<String>,
    #[arg(long, global = true, help = "Add the category even if the file is already in a known one")]
    ignore_existing: bool,
    #[arg(
        long,
        global = true,
        value_name = "CATEGORY",
        help = "Remove this category while adding the new one"
    )]
    move_from: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Process a single file.
    File { title: String },
    /// Process a user's uploads, newest first.
    User {
        user: String,
        #[arg(value_name = "YYYYMMDDHHMMSS")]
        timestamp: Option<String>,
    },
    /// Process the files in a category.
    Category {
        category: String,
        #[arg(value_name = "SORTKEY_PREFIX")]
        sortkey_prefix: Option<String>,
    },
    /// Process randomly sampled files until a limit is hit.
    Random,
    /// Process all uploads, oldest first.
    Forward {
        #[arg(value_name = "YYYYMMDDHHMMSS")]
        timestamp: Option<String>,
    },
    /// Process all uploads, newest first.
    Back {
        #[arg(value_name = "YYYYMMDDHHMMSS")]
        timestamp: Option<String>,
    },
    /// Move files out of the unidentified Canon PowerShot S100/S110 categories.
    Reclassify,
}

impl Commands {
    fn work_unit(&self) -> Result<WorkUnit> {
        match self {
            Self::File { title } => Ok(WorkUnit::file(title)),
            Self::User { user, timestamp } => WorkUnit::user(user, timestamp.as_deref()),
            Self::Category {
                category,
                sortkey_prefix,
            } => Ok(WorkUnit::category(category, sortkey_prefix.as_deref())),
            Self::Random => Ok(WorkUnit::Random),
            Self::Forward { timestamp } => {
                WorkUnit::sweep(SortDirection::Ascending, timestamp.as_deref())
            }
            Self::Back { timestamp } => {
                WorkUnit::sweep(SortDirection::Descending, timestamp.as_deref())
            }
            Self::Reclassify => Ok(WorkUnit::Reclassify),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let unit = cli.command.work_unit()?;

    let paths = resolve_runtime_paths(&cli)?;
    if cli.diagnostics {
        println!("{}", paths.diagnostics());
    }
    paths.ensure_required_files()?;

    let config = load_config(&paths.config_path)?;
    let settings = apply_overrides(RunSettings::from_config(&config), &cli.run);
    let rules = CategoryRules::load(&paths.mapping_path, &paths.patterns_path)?;
    let exceptions = load_exceptions(&paths.exceptions_path)?;
    let known = KnownCategorySet::build(&rules, &exceptions);
    let cache = CategoryCountCache::load(&paths.counts_path)?;
    info!(
        exact = rules.exact_len(),
        patterns = rules.pattern_len(),
        known = known.len(),
        cached_counts = cache.len(),
        "loaded category rules"
    );

    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(&config))?;
    let (username, password) = credentials_from_env()?;
    client
        .login(&username, &password)
        .with_context(|| format!("failed to log in as {username}"))?;

    let mut session = Session::new(client, rules, known, cache, settings);
    let outcome = session.run(&unit);
    let requests = session.api().request_count();
    // Publishes the warning gallery even when the run failed.
    let (stats, published) = session.finish();

    for line in stats.lines() {
        println!("{line}");
    }
    println!("stats.requests: {requests}");
    outcome?;
    published
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(format!(
            "takenwith={default_level},takenwith_core={default_level}"
        )),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|error| anyhow!("failed to initialise logging: {error}"))
}

fn resolve_runtime_paths(cli: &Cli) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        work_dir: cli.work_dir.clone(),
        config: cli.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let work_env = initial.work_dir.join(".env");
    if work_env.exists() {
        let _ = dotenvy::from_path_override(&work_env);
    }

    resolve_paths(&context, &overrides)
}

fn apply_overrides(mut settings: RunSettings, args: &RunArgs) -> RunSettings {
    if let Some(limit) = args.cat_file_limit {
        settings.cat_file_limit = limit.max(0);
    }
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size.max(1);
    }
    if let Some(max_files) = args.max_files {
        settings.max_files = max_files;
    }
    if let Some(max_warnings) = args.max_warnings {
        settings.max_warnings = max_warnings;
    }
    if let Some(page) = &args.gallery_page {
        settings.gallery_page = Some(page.clone());
    }
    settings.membership.ignore_existing = args.ignore_existing;
    settings.membership.move_from = args
        .move_from
        .as_deref()
        .map(|category| category_title(category.trim()));
    settings
}

fn category_title(name: &str) -> String {
    if name.starts_with("Category:") {
        name.to_string()
    } else {
        format!("Category:{name}")
    }
}

fn credentials_from_env() -> Result<(String, String)> {
    let username = env::var("WIKI_BOT_USER")
        .map_err(|_| anyhow!("WIKI_BOT_USER is required to edit"))?;
    let password = env::var("WIKI_BOT_PASS")
        .map_err(|_| anyhow!("WIKI_BOT_PASS is required to edit"))?;
    Ok((username, password))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use takenwith_core::config::BotConfig;
    use takenwith_core::pipeline::{RunSettings, WorkUnit};

    use super::{Cli, apply_overrides};

    #[test]
    fn global_flags_override_config() {
        let cli = Cli::try_parse_from([
            "takenwith",
            "category",
            "Sunsets",
            "--cat-file-limit",
            "0",
            "--move-from",
            "Taken with old name",
            "--ignore-existing",
        ])
        .expect("parse");
        let settings = apply_overrides(RunSettings::from_config(&BotConfig::default()), &cli.run);
        assert_eq!(settings.cat_file_limit, 0);
        assert!(settings.membership.ignore_existing);
        assert_eq!(
            settings.membership.move_from.as_deref(),
            Some("Category:Taken with old name")
        );
        assert_eq!(
            cli.command.work_unit().expect("unit"),
            WorkUnit::category("Category:Sunsets", None)
        );
    }

    #[test]
    fn bad_timestamps_are_rejected() {
        let cli = Cli::try_parse_from(["takenwith", "forward", "2024-01-01"]).expect("parse");
        assert!(cli.command.work_unit().is_err());
    }
}
