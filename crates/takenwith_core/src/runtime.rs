use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::CONFIG_FILENAME;

pub const MAPPING_FILENAME: &str = "catmapping";
pub const EXCEPTIONS_FILENAME: &str = "catexceptions";
pub const PATTERNS_FILENAME: &str = "catpatterns";
pub const COUNTS_FILENAME: &str = "catcounts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub work_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub work_dir: PathBuf,
    pub config_path: PathBuf,
    pub mapping_path: PathBuf,
    pub exceptions_path: PathBuf,
    pub patterns_path: PathBuf,
    pub counts_path: PathBuf,
    pub work_dir_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "work_dir={} ({})\nconfig_path={} ({})\nmapping_path={}\nexceptions_path={}\npatterns_path={}\ncounts_path={}",
            normalize_for_display(&self.work_dir),
            self.work_dir_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.mapping_path),
            normalize_for_display(&self.exceptions_path),
            normalize_for_display(&self.patterns_path),
            normalize_for_display(&self.counts_path),
        )
    }

    /// The mapping and exception lists must exist before any processing.
    /// Patterns and counts are optional.
    pub fn ensure_required_files(&self) -> Result<()> {
        let missing = [&self.mapping_path, &self.exceptions_path]
            .into_iter()
            .filter(|path| !path.exists())
            .map(|path| format!("  - {}", normalize_for_display(path)))
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            bail!(
                "Required configuration files are missing:\n{}\nSet --work-dir or TAKENWITH_DIR to the directory holding them.",
                missing.join("\n")
            );
        }
        Ok(())
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (work_dir, work_dir_source) = if let Some(path) = overrides.work_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = ["TAKENWITH_DIR", "WIKI_BOTTING_DIR"]
        .into_iter()
        .filter_map(&lookup_env)
        .find(|value| !value.trim().is_empty())
    {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        (context.cwd.clone(), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup_env("TAKENWITH_CONFIG").filter(|v| !v.trim().is_empty()) {
        (
            absolutize(Path::new(value.trim()), &work_dir),
            ValueSource::Env,
        )
    } else {
        (work_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        mapping_path: work_dir.join(MAPPING_FILENAME),
        exceptions_path: work_dir.join(EXCEPTIONS_FILENAME),
        patterns_path: work_dir.join(PATTERNS_FILENAME),
        counts_path: work_dir.join(COUNTS_FILENAME),
        work_dir,
        config_path,
        work_dir_source,
        config_source,
    })
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
