use anyhow::Result;
use tracing::{info, warn};

use crate::api::WikiApi;
use crate::editor::{EditResult, SafeEditor};
use crate::record::FileRecord;

pub const MAX_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningEntry {
    pub title: String,
    pub message: String,
    sort_key: String,
}

impl WarningEntry {
    pub fn new(title: &str, message: &str) -> Self {
        let message = message.trim().to_string();
        Self {
            title: title.to_string(),
            sort_key: message.to_lowercase(),
            message,
        }
    }

    /// Gallery caption: truncated, with wiki syntax escaped. Messages holding
    /// URLs are replaced outright since some hosts are spam-listed.
    fn caption(&self) -> String {
        if self.message.contains("http:") || self.message.contains("https:") {
            return "URL omitted".to_string();
        }
        let truncated = match self.message.char_indices().nth(MAX_MESSAGE_CHARS) {
            Some((cut, _)) => format!("{}...", &self.message[..cut]),
            None => self.message.clone(),
        };
        truncated
            .replace('|', "<nowiki>|</nowiki>")
            .replace('\n', "<br>")
    }
}

/// Warned files collected over a run.
#[derive(Debug, Clone, Default)]
pub struct WarningGallery {
    entries: Vec<WarningEntry>,
}

impl WarningGallery {
    /// Collect the warnings from a finished batch. Returns how many were added.
    pub fn append(&mut self, records: &[FileRecord]) -> usize {
        let before = self.entries.len();
        self.entries.extend(records.iter().filter_map(|record| {
            record
                .warning()
                .map(|message| WarningEntry::new(&record.title, message))
        }));
        self.entries.len() - before
    }

    pub fn push(&mut self, title: &str, message: &str) {
        self.entries.push(WarningEntry::new(title, message));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered case-insensitively by message.
    pub fn sorted(&self) -> Vec<&WarningEntry> {
        let mut entries = self.entries.iter().collect::<Vec<_>>();
        entries.sort_by(|left, right| left.sort_key.cmp(&right.sort_key));
        entries
    }

    pub fn render(&self) -> String {
        let mut out = String::from("<gallery>\n");
        for entry in self.sorted() {
            out.push_str(&entry.title);
            out.push('|');
            out.push_str(&entry.caption());
            out.push('\n');
        }
        out.push_str("</gallery>");
        out
    }

    /// Rewrite `page` with the rendered gallery. The page must already exist.
    pub fn publish<A: WikiApi>(
        &self,
        page: &str,
        editor: &mut SafeEditor,
        api: &mut A,
    ) -> Result<()> {
        let summary = format!("files with warnings: {}", self.entries.len());
        match editor.replace_page(api, page, &self.render(), &summary)? {
            EditResult::Saved => info!(page, entries = self.entries.len(), "published warning gallery"),
            EditResult::Unchanged => info!(page, "warning gallery unchanged"),
            EditResult::Protected(reason) => {
                warn!(page, "warning gallery is protected: {reason}");
            }
            EditResult::Missing => warn!(page, "warning gallery page does not exist"),
        }
        Ok(())
    }
}
