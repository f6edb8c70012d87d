use tracing::warn;

use crate::api::FilePage;
use crate::camera::{Camera, MetadataEntry, extract_camera};

/// Working state of one file while a batch passes through the pipeline.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub title: String,
    pub common_metadata: Vec<MetadataEntry>,
    pub metadata: Vec<MetadataEntry>,
    pub camera: Camera,
    /// Resolved target category. Empty while unresolved.
    pub category: String,
    processed: bool,
    warning: Option<String>,
}

impl FileRecord {
    pub fn from_page(page: FilePage) -> Self {
        let camera = extract_camera(&page.common_metadata);
        Self {
            title: page.title,
            common_metadata: page.common_metadata,
            metadata: page.metadata,
            camera,
            category: String::new(),
            processed: false,
            warning: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub fn mark_processed(&mut self) {
        debug_assert!(!self.processed, "{} processed twice", self.title);
        self.processed = true;
    }

    /// Record a warning. Only the first one is kept.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(title = %self.title, "{message}");
        if self.warning.is_none() {
            self.warning = Some(message);
        }
    }

    /// Warn and take the file out of the rest of the pipeline.
    pub fn reject(&mut self, message: impl Into<String>) {
        self.warn(message);
        self.mark_processed();
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn has_camera(&self) -> bool {
        !self.camera.is_empty()
    }

    /// Metadata block used for Exif field checks. PNG and some other formats
    /// only populate the common block.
    pub fn exif_source(&self) -> &[MetadataEntry] {
        if self.metadata.is_empty() {
            &self.common_metadata
        } else {
            &self.metadata
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FileRecord;
    use crate::api::FilePage;
    use crate::camera::{Camera, MetadataEntry};

    fn page(common: Vec<MetadataEntry>, metadata: Vec<MetadataEntry>) -> FilePage {
        FilePage {
            title: "File:Example.jpg".to_string(),
            missing: false,
            common_metadata: common,
            metadata,
        }
    }

    #[test]
    fn first_warning_wins() {
        let mut record = FileRecord::from_page(page(Vec::new(), Vec::new()));
        record.warn("first");
        record.reject("second");
        assert_eq!(record.warning(), Some("first"));
        assert!(record.is_processed());
    }

    #[test]
    fn camera_comes_from_common_metadata() {
        let record = FileRecord::from_page(page(
            vec![
                MetadataEntry::text("Make", "Canon"),
                MetadataEntry::text("Model", "Canon PowerShot S100"),
            ],
            Vec::new(),
        ));
        assert_eq!(record.camera, Camera::new("Canon", "Canon PowerShot S100"));
        assert!(record.has_camera());
        assert_eq!(record.exif_source().len(), 2);
    }

    #[test]
    fn exif_source_prefers_full_metadata() {
        let record = FileRecord::from_page(page(
            vec![MetadataEntry::text("Make", "Canon")],
            vec![
                MetadataEntry::text("ISOSpeedRatings", "100"),
                MetadataEntry::text("DateTimeOriginal", "2012:01:01 00:00:00"),
            ],
        ));
        assert_eq!(record.exif_source().len(), 2);
    }
}
