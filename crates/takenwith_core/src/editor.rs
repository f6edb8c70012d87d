use std::sync::LazyLock;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use regex::bytes::Regex as BytesRegex;
use tracing::{debug, warn};

use crate::api::{ApiError, EditOutcome, EditRequest, WikiApi};
use crate::mapping::CATEGORY_PREFIX;

pub const MAX_EDIT_ATTEMPTS: usize = 3;

static CATEGORY_LINK_RE: LazyLock<BytesRegex> = LazyLock::new(|| {
    BytesRegex::new(r"\[\[\s*[Cc]ategory\s*:[^\]]*\]\]").expect("valid category link regex")
});

/// Tags whose content the wiki parser leaves alone, besides comments.
const UNPARSED_TAGS: [&str; 3] = ["nowiki", "pre", "math"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnparsedRegion {
    pub start: usize,
    /// Byte offset after the closing delimiter; `None` when unterminated,
    /// in which case the region runs to the end of the text.
    pub end: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    AfterCategory,
    BeforeUnterminated,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionPoint {
    pub offset: usize,
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditResult {
    Saved,
    /// The server accepted the edit but the text was identical.
    Unchanged,
    Protected(String),
    Missing,
}

enum Opener {
    Comment,
    Tag(&'static str),
}

/// Locate comments and `nowiki`/`pre`/`math` blocks. Scanning stops at the
/// first unterminated region.
pub fn unparsed_regions(text: &str) -> Vec<UnparsedRegion> {
    let lower = text.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut regions = Vec::new();
    let mut cursor = 0;

    while let Some((start, opener)) = next_opener(&lower, cursor) {
        match opener {
            Opener::Comment => match lower[start + 4..].find("-->") {
                Some(rel) => {
                    let end = start + 4 + rel + 3;
                    regions.push(UnparsedRegion {
                        start,
                        end: Some(end),
                    });
                    cursor = end;
                }
                None => {
                    regions.push(UnparsedRegion { start, end: None });
                    break;
                }
            },
            Opener::Tag(name) => {
                let after_name = start + 1 + name.len();
                let Some(rel) = lower[after_name..].find('>') else {
                    regions.push(UnparsedRegion { start, end: None });
                    break;
                };
                let open_end = after_name + rel + 1;
                if bytes[open_end - 2] == b'/' {
                    // <nowiki/> and friends hold nothing.
                    cursor = open_end;
                    continue;
                }
                let closer = format!("</{name}");
                match lower[open_end..].find(&closer) {
                    Some(rel) => {
                        let close_start = open_end + rel;
                        let end = lower[close_start..]
                            .find('>')
                            .map_or(lower.len(), |rel| close_start + rel + 1);
                        regions.push(UnparsedRegion {
                            start,
                            end: Some(end),
                        });
                        cursor = end;
                    }
                    None => {
                        regions.push(UnparsedRegion { start, end: None });
                        break;
                    }
                }
            }
        }
    }
    regions
}

fn next_opener(lower: &str, from: usize) -> Option<(usize, Opener)> {
    let bytes = lower.as_bytes();
    for (rel, _) in lower[from..].match_indices('<') {
        let idx = from + rel;
        let rest = &lower[idx + 1..];
        if rest.starts_with("!--") {
            return Some((idx, Opener::Comment));
        }
        for name in UNPARSED_TAGS {
            if rest.starts_with(name)
                && matches!(
                    bytes.get(idx + 1 + name.len()),
                    None | Some(b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r')
                )
            {
                return Some((idx, Opener::Tag(name)));
            }
        }
    }
    None
}

/// Where a new category link goes: after the last live category link, else
/// before an unterminated unparsed region, else at the end.
pub fn find_insertion_point(text: &str) -> InsertionPoint {
    let regions = unparsed_regions(text);
    let mut masked = text.as_bytes().to_vec();
    for region in &regions {
        let end = region.end.unwrap_or(masked.len());
        masked[region.start..end].fill(b' ');
    }

    if let Some(found) = CATEGORY_LINK_RE.find_iter(&masked).last() {
        return InsertionPoint {
            offset: found.end(),
            placement: Placement::AfterCategory,
        };
    }
    if let Some(region) = regions.iter().find(|region| region.end.is_none()) {
        return InsertionPoint {
            offset: region.start,
            placement: Placement::BeforeUnterminated,
        };
    }
    InsertionPoint {
        offset: text.len(),
        placement: Placement::End,
    }
}

pub fn insert_category(text: &str, category: &str) -> String {
    let point = find_insertion_point(text);
    let link = format!("[[{category}]]");
    let (head, tail) = text.split_at(point.offset);
    match point.placement {
        Placement::AfterCategory => format!("{head}\n{link}{tail}"),
        Placement::BeforeUnterminated => format!("{head}{link}\n{tail}"),
        Placement::End if text.is_empty() || text.ends_with('\n') => format!("{text}{link}"),
        Placement::End => format!("{text}\n{link}"),
    }
}

/// Strip every link to `category`, with or without a sort key. Spaces and
/// underscores in the name are interchangeable.
pub fn remove_category(text: &str, category: &str) -> Result<String> {
    let name = category.strip_prefix(CATEGORY_PREFIX).unwrap_or(category);
    let name_pattern = name
        .split([' ', '_'])
        .filter(|part| !part.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("[ _]+");
    let pattern = format!(r"\[\[\s*[Cc]ategory\s*:\s*{name_pattern}\s*(?:\|[^\]]*)?\]\]\n?");
    let regex = Regex::new(&pattern)
        .with_context(|| format!("failed to build removal pattern for {category}"))?;
    Ok(regex.replace_all(text, "").into_owned())
}

/// Applies page edits with conflict detection, retries, and a minimum
/// interval between saves.
pub struct SafeEditor {
    min_interval: Duration,
    last_edit_at: Option<Instant>,
}

impl SafeEditor {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_edit_at: None,
        }
    }

    pub fn add_category<A: WikiApi>(
        &mut self,
        api: &mut A,
        title: &str,
        category: &str,
    ) -> Result<EditResult> {
        let summary = format!("added [[{category}]]");
        self.edit_with_retries(api, title, &summary, true, |text| {
            Ok(insert_category(text, category))
        })
    }

    pub fn move_category<A: WikiApi>(
        &mut self,
        api: &mut A,
        title: &str,
        from: &str,
        to: &str,
        reason: Option<&str>,
    ) -> Result<EditResult> {
        let summary = match reason {
            Some(reason) => format!("moved from [[{from}]] to [[{to}]] {reason}"),
            None => format!("moved from [[{from}]] to [[{to}]]"),
        };
        self.edit_with_retries(api, title, &summary, true, |text| {
            let stripped = remove_category(text, from)?;
            if stripped == text {
                debug!(title, category = from, "no direct link to remove");
            }
            Ok(insert_category(&stripped, to))
        })
    }

    /// Overwrite an existing page wholesale.
    pub fn replace_page<A: WikiApi>(
        &mut self,
        api: &mut A,
        title: &str,
        text: &str,
        summary: &str,
    ) -> Result<EditResult> {
        self.edit_with_retries(api, title, summary, false, |_| Ok(text.to_string()))
    }

    fn edit_with_retries<A, F>(
        &mut self,
        api: &mut A,
        title: &str,
        summary: &str,
        minor: bool,
        mut transform: F,
    ) -> Result<EditResult>
    where
        A: WikiApi,
        F: FnMut(&str) -> Result<String>,
    {
        let mut last_error = None;
        for attempt in 1..=MAX_EDIT_ATTEMPTS {
            let page = match api.get_page_text(title) {
                Ok(page) => page,
                Err(error) => {
                    warn!(title, attempt, "failed to fetch page: {error:#}");
                    last_error = Some(error);
                    continue;
                }
            };
            if !page.exists {
                return Ok(EditResult::Missing);
            }

            let new_text = transform(&page.content)?;
            self.throttle();
            let outcome = api.edit_page(&EditRequest {
                title,
                text: &new_text,
                summary,
                base_timestamp: &page.timestamp,
                minor,
                nocreate: true,
            });
            self.last_edit_at = Some(Instant::now());

            match outcome {
                Ok(EditOutcome::Saved) => return Ok(EditResult::Saved),
                Ok(EditOutcome::NoChange) => return Ok(EditResult::Unchanged),
                Err(error) => {
                    if let Some(api_error) = error.downcast_ref::<ApiError>() {
                        if api_error.is_protection() {
                            return Ok(EditResult::Protected(api_error.info.clone()));
                        }
                        if api_error.code == "missingtitle" {
                            return Ok(EditResult::Missing);
                        }
                    }
                    warn!(title, attempt, "edit failed: {error:#}");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("no edit attempt was made")))
            .with_context(|| format!("failed to save {title} after {MAX_EDIT_ATTEMPTS} attempts"))
    }

    fn throttle(&self) {
        if let Some(last) = self.last_edit_at {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{
        EditResult, Placement, SafeEditor, UnparsedRegion, find_insertion_point, insert_category,
        remove_category, unparsed_regions,
    };
    use crate::api::ApiError;
    use crate::api::testing::MockApi;

    #[test]
    fn inserts_after_last_live_category() {
        let text = "Some file.\n[[Category:A]]\n[[Category:B|key]]\n{{footer}}";
        let point = find_insertion_point(text);
        assert_eq!(point.placement, Placement::AfterCategory);
        assert_eq!(
            insert_category(text, "Category:Taken with X"),
            "Some file.\n[[Category:A]]\n[[Category:B|key]]\n[[Category:Taken with X]]\n{{footer}}"
        );
    }

    #[test]
    fn commented_category_is_ignored() {
        let text = "Description\n<!-- [[Category:A]] -->";
        let point = find_insertion_point(text);
        assert_eq!(point.placement, Placement::End);
        assert_eq!(point.offset, text.len());
        assert_eq!(
            insert_category(text, "Category:Y"),
            "Description\n<!-- [[Category:A]] -->\n[[Category:Y]]"
        );
    }

    #[test]
    fn inserts_before_unterminated_pre() {
        let text = "Intro\n<PRE>\n[[Category:Inside]]";
        let point = find_insertion_point(text);
        assert_eq!(point.placement, Placement::BeforeUnterminated);
        assert_eq!(point.offset, 6);
        assert_eq!(
            insert_category(text, "Category:Y"),
            "Intro\n[[Category:Y]]\n<PRE>\n[[Category:Inside]]"
        );
    }

    #[test]
    fn self_closing_nowiki_masks_nothing() {
        let text = "a<nowiki/>b\n[[Category:A]]";
        assert!(unparsed_regions(text).is_empty());
        assert_eq!(
            find_insertion_point(text).placement,
            Placement::AfterCategory
        );
    }

    #[test]
    fn closed_regions_are_all_masked() {
        let text = "<nowiki>[[Category:A]]</NoWiki> x <math>[[Category:B]]</math>";
        let regions = unparsed_regions(text);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].start, 0);
        assert!(regions.iter().all(|region| region.end.is_some()));
        assert_eq!(find_insertion_point(text).placement, Placement::End);
    }

    #[test]
    fn similar_tag_names_are_not_regions() {
        let text = "<preview>[[Category:A]]</preview>";
        assert_eq!(unparsed_regions(text), Vec::<UnparsedRegion>::new());
        assert_eq!(
            find_insertion_point(text).placement,
            Placement::AfterCategory
        );
    }

    #[test]
    fn empty_page_gets_bare_link() {
        assert_eq!(insert_category("", "Category:Y"), "[[Category:Y]]");
        assert_eq!(insert_category("text\n", "Category:Y"), "text\n[[Category:Y]]");
    }

    #[test]
    fn remove_category_handles_sort_keys_and_underscores() {
        let text = "x\n[[Category:Taken_with unidentified Canon|k]]\n[[Category:Other]]";
        let stripped =
            remove_category(text, "Category:Taken with unidentified Canon").expect("remove");
        assert_eq!(stripped, "x\n[[Category:Other]]");
    }

    #[test]
    fn move_category_strips_source_and_adds_target() {
        let mut api = MockApi::default().with_page(
            "File:A.jpg",
            "desc\n[[Category:Taken with unidentified Canon PowerShot S100]]",
        );
        let mut editor = SafeEditor::new(Duration::ZERO);
        let result = editor
            .move_category(
                &mut api,
                "File:A.jpg",
                "Category:Taken with unidentified Canon PowerShot S100",
                "Category:Taken with Canon PowerShot S100",
                Some("since Exif contains ISO speed rating"),
            )
            .expect("move");
        assert_eq!(result, EditResult::Saved);
        assert_eq!(api.edits.len(), 1);
        assert_eq!(
            api.edits[0].text,
            "desc\n[[Category:Taken with Canon PowerShot S100]]"
        );
        assert!(api.edits[0].summary.starts_with("moved from [[Category:Taken with unidentified"));
        assert!(api.edits[0].summary.ends_with("since Exif contains ISO speed rating"));
    }

    #[test]
    fn retries_transient_failures_with_fresh_fetch() {
        let mut api = MockApi::default().with_page("File:A.jpg", "desc");
        api.edit_failures
            .push_back(ApiError::new("editconflict", "Edit conflict."));
        api.edit_failures
            .push_back(ApiError::new("badtoken", "Invalid token."));
        let mut editor = SafeEditor::new(Duration::ZERO);

        let result = editor
            .add_category(&mut api, "File:A.jpg", "Category:Y")
            .expect("add");
        assert_eq!(result, EditResult::Saved);
        assert_eq!(api.page_fetches, 3);
        assert_eq!(api.edits[0].summary, "added [[Category:Y]]");
        assert_eq!(api.edits[0].base_timestamp, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn protected_page_aborts_without_retry() {
        let mut api = MockApi::default().with_page("File:A.jpg", "desc");
        api.edit_failures.push_back(ApiError::new(
            "protectedpage",
            "This page has been protected.",
        ));
        let mut editor = SafeEditor::new(Duration::ZERO);

        let result = editor
            .add_category(&mut api, "File:A.jpg", "Category:Y")
            .expect("add");
        assert_eq!(
            result,
            EditResult::Protected("This page has been protected.".to_string())
        );
        assert_eq!(api.page_fetches, 1);
    }

    #[test]
    fn exhausted_retries_are_errors() {
        let mut api = MockApi::default().with_page("File:A.jpg", "desc");
        for _ in 0..3 {
            api.edit_failures
                .push_back(ApiError::new("editconflict", "Edit conflict."));
        }
        let mut editor = SafeEditor::new(Duration::ZERO);

        let error = editor
            .add_category(&mut api, "File:A.jpg", "Category:Y")
            .expect_err("must fail");
        assert!(error.to_string().contains("after 3 attempts"));
        assert!(api.edits.is_empty());
    }

    #[test]
    fn missing_page_is_reported() {
        let mut api = MockApi::default();
        let mut editor = SafeEditor::new(Duration::ZERO);
        let result = editor
            .add_category(&mut api, "File:Gone.jpg", "Category:Y")
            .expect("add");
        assert_eq!(result, EditResult::Missing);
    }

    #[test]
    fn consecutive_saves_respect_minimum_interval() {
        let mut api = MockApi::default()
            .with_page("File:1.jpg", "one")
            .with_page("File:2.jpg", "two");
        let interval = Duration::from_millis(150);
        let mut editor = SafeEditor::new(interval);

        let started = Instant::now();
        editor
            .add_category(&mut api, "File:1.jpg", "Category:Y")
            .expect("first");
        assert!(started.elapsed() < interval);
        editor
            .add_category(&mut api, "File:2.jpg", "Category:Y")
            .expect("second");
        assert!(started.elapsed() >= interval);
        assert_eq!(api.edits.len(), 2);
    }
}
