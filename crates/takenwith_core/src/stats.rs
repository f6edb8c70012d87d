/// Counters accumulated over a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub examined: usize,
    pub with_camera: usize,
    pub warnings: usize,
    pub in_category: usize,
    /// Skipped because the target category reached the quota.
    pub populated: usize,
    /// Excluded by a `skip` mapping.
    pub skipped: usize,
    /// Targets whose category was empty, possibly a stale redirect.
    pub empty_targets: usize,
    pub edited: usize,
}

impl RunStats {
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("stats.examined: {}", self.examined),
            format!("stats.with_camera: {}", self.with_camera),
            format!("stats.warnings: {}", self.warnings),
            format!("stats.already_categorized: {}", self.in_category),
            format!("stats.quota_skipped: {}", self.populated),
            format!("stats.skip_mapped: {}", self.skipped),
            format!("stats.empty_targets: {}", self.empty_targets),
            format!("stats.edited: {}", self.edited),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::RunStats;

    #[test]
    fn lines_cover_every_counter() {
        let stats = RunStats {
            examined: 10,
            edited: 3,
            ..RunStats::default()
        };
        let lines = stats.lines();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "stats.examined: 10");
        assert_eq!(lines[7], "stats.edited: 3");
    }
}
