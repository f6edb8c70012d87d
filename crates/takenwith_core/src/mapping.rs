use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::debug;

use crate::camera::Camera;
use crate::disambiguate::DisambiguationRule;

pub const CATEGORY_PREFIX: &str = "Category:";
pub const TAKEN_WITH_PREFIX: &str = "Category:Taken with ";
pub const SKIP_MARKER: &str = "skip ";
pub const DISAMBIGUATE_MARKER: &str = "disambiguate ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedTarget {
    Category(String),
    /// Operator suppression; the text after the marker is informational.
    Skip(String),
    Disambiguate(DisambiguationRule),
}

#[derive(Debug, Clone)]
pub struct PatternRule {
    pub pattern: Regex,
    pub target: MappedTarget,
}

/// Make/model to category rules: an exact map keyed by `make ++ model`, then
/// an ordered list of patterns over the same key.
#[derive(Debug, Clone, Default)]
pub struct CategoryRules {
    exact: HashMap<String, MappedTarget>,
    patterns: Vec<PatternRule>,
}

impl CategoryRules {
    pub fn new(exact: HashMap<String, MappedTarget>, patterns: Vec<PatternRule>) -> Self {
        Self { exact, patterns }
    }

    /// Load the mapping table and, when present, the pattern table.
    pub fn load(mapping_path: &Path, patterns_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(mapping_path)
            .with_context(|| format!("failed to read {}", mapping_path.display()))?;
        let exact = parse_mapping(&content, &mapping_path.display().to_string())?;

        let patterns = if patterns_path.exists() {
            let content = fs::read_to_string(patterns_path)
                .with_context(|| format!("failed to read {}", patterns_path.display()))?;
            parse_patterns(&content, &patterns_path.display().to_string())?
        } else {
            debug!(path = %patterns_path.display(), "no pattern table, exact mapping only");
            Vec::new()
        };

        Ok(Self { exact, patterns })
    }

    pub fn resolve(&self, camera: &Camera) -> Option<&MappedTarget> {
        let key = camera.key();
        if let Some(target) = self.exact.get(&key) {
            return Some(target);
        }
        self.patterns
            .iter()
            .find(|rule| rule.pattern.is_match(&key))
            .map(|rule| &rule.target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &MappedTarget> {
        self.exact
            .values()
            .chain(self.patterns.iter().map(|rule| &rule.target))
    }

    pub fn exact_len(&self) -> usize {
        self.exact.len()
    }

    pub fn pattern_len(&self) -> usize {
        self.patterns.len()
    }
}

/// Every category the bot maps to, plus subcategories that files may already
/// sit in without a `Taken with` name.
#[derive(Debug, Clone, Default)]
pub struct KnownCategorySet {
    categories: HashSet<String>,
}

impl KnownCategorySet {
    pub fn build(rules: &CategoryRules, exceptions: &[String]) -> Self {
        let mut categories = HashSet::new();
        for target in rules.targets() {
            match target {
                MappedTarget::Category(category) => {
                    categories.insert(category.clone());
                }
                MappedTarget::Disambiguate(rule) => {
                    categories.extend(rule.categories().iter().map(|name| name.to_string()));
                }
                MappedTarget::Skip(_) => {}
            }
        }
        categories.extend(exceptions.iter().cloned());
        Self { categories }
    }

    pub fn contains(&self, category: &str) -> bool {
        self.categories.contains(category)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Read the exception list: one bare category name per line.
pub fn load_exceptions(path: &Path) -> Result<Vec<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_exceptions(&content))
}

pub fn parse_exceptions(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| format!("{CATEGORY_PREFIX}{line}"))
        .collect()
}

/// Parse `make,model,target` records.
pub fn parse_mapping(content: &str, source: &str) -> Result<HashMap<String, MappedTarget>> {
    let mut exact = HashMap::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_record(line)
            .with_context(|| format!("bad record in {source}:{}", line_no + 1))?;
        if fields.len() != 3 {
            bail!(
                "bad record in {source}:{}: expected 3 fields (make, model, target), found {}",
                line_no + 1,
                fields.len()
            );
        }
        let target = convert_target(&fields[2])
            .with_context(|| format!("bad record in {source}:{}", line_no + 1))?;
        exact.insert(format!("{}{}", fields[0], fields[1]), target);
    }
    Ok(exact)
}

/// Parse `pattern,target` records, keeping file order.
pub fn parse_patterns(content: &str, source: &str) -> Result<Vec<PatternRule>> {
    let mut patterns = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_record(line)
            .with_context(|| format!("bad record in {source}:{}", line_no + 1))?;
        if fields.len() != 2 {
            bail!(
                "bad record in {source}:{}: expected 2 fields (pattern, target), found {}",
                line_no + 1,
                fields.len()
            );
        }
        let pattern = Regex::new(&fields[0]).with_context(|| {
            format!("invalid pattern in {source}:{}: {}", line_no + 1, fields[0])
        })?;
        let target = convert_target(&fields[1])
            .with_context(|| format!("bad record in {source}:{}", line_no + 1))?;
        patterns.push(PatternRule { pattern, target });
    }
    Ok(patterns)
}

/// Bare names get the `Category:Taken with ` prefix; full category names and
/// directives are used as-is.
pub fn convert_target(field: &str) -> Result<MappedTarget> {
    if field.starts_with(CATEGORY_PREFIX) {
        return Ok(MappedTarget::Category(field.to_string()));
    }
    if field.starts_with(SKIP_MARKER) {
        return Ok(MappedTarget::Skip(field.to_string()));
    }
    if let Some(name) = field.strip_prefix(DISAMBIGUATE_MARKER) {
        return DisambiguationRule::from_name(name)
            .map(MappedTarget::Disambiguate)
            .ok_or_else(|| anyhow::anyhow!("unknown disambiguation rule: {name}"));
    }
    if field.starts_with("Taken with") {
        bail!("target would become \"Taken with Taken with\": {field}");
    }
    if field.trim().is_empty() {
        bail!("empty target");
    }
    Ok(MappedTarget::Category(format!("{TAKEN_WITH_PREFIX}{field}")))
}

/// Split one comma-separated record. Fields may be double-quoted, with `""`
/// standing for a literal quote.
fn split_record(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }
    if in_quotes {
        bail!("unterminated quoted field");
    }
    fields.push(field);
    Ok(fields)
}
