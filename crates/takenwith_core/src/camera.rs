use serde_json::Value;

/// A single `{name, value}` item from an imageinfo `commonmetadata` or
/// `metadata` array.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub name: String,
    pub value: MetadataValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Text(String),
    /// Some formats (PNG in particular) embed a secondary metadata block as
    /// an array of entries under the name `metadata`.
    Nested(Vec<MetadataEntry>),
    Other(Value),
}

impl MetadataEntry {
    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: MetadataValue::Text(value.to_string()),
        }
    }

    pub fn nested(name: &str, entries: Vec<MetadataEntry>) -> Self {
        Self {
            name: name.to_string(),
            value: MetadataValue::Nested(entries),
        }
    }

    fn as_text(&self) -> Option<&str> {
        match &self.value {
            MetadataValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Camera {
    pub make: String,
    pub model: String,
}

impl Camera {
    pub fn new(make: &str, model: &str) -> Self {
        Self {
            make: make.to_string(),
            model: model.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.make.is_empty() && self.model.is_empty()
    }

    /// Lookup key for the category map: make and model concatenated without
    /// a separator. Distinct pairs can collide on this key.
    pub fn key(&self) -> String {
        format!("{}{}", self.make, self.model)
    }
}

/// Fields of the Exif block used to tell apart cameras that share a model
/// string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExifFields {
    pub has_iso_speed: bool,
    /// Year from `DateTimeOriginal`, or 0 when absent or unparseable.
    pub year: i32,
}

/// Convert an imageinfo metadata array into entries. Items that are not
/// named objects are dropped, so malformed input yields an empty tree.
pub fn parse_metadata(value: &Value) -> Vec<MetadataEntry> {
    match value.as_array() {
        Some(items) => items.iter().filter_map(parse_entry).collect(),
        None => Vec::new(),
    }
}

fn parse_entry(item: &Value) -> Option<MetadataEntry> {
    let name = match item.get("name")? {
        Value::String(name) => name.clone(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    let value = match item.get("value") {
        Some(Value::String(text)) => MetadataValue::Text(text.clone()),
        Some(Value::Array(items)) if items.iter().all(Value::is_object) => {
            MetadataValue::Nested(items.iter().filter_map(parse_entry).collect())
        }
        Some(other) => MetadataValue::Other(other.clone()),
        None => MetadataValue::Other(Value::Null),
    };
    Some(MetadataEntry { name, value })
}

/// Find the camera make and model. Later entries at the same level win; a
/// nested block only overrides when it yields a non-empty value.
pub fn extract_camera(entries: &[MetadataEntry]) -> Camera {
    let mut camera = Camera::default();
    for entry in entries {
        match entry.name.as_str() {
            "Make" => {
                if let Some(value) = entry.as_text() {
                    camera.make = trim_value(value).to_string();
                }
            }
            "Model" => {
                if let Some(value) = entry.as_text() {
                    camera.model = trim_value(value).to_string();
                }
            }
            "metadata" => {
                if let MetadataValue::Nested(nested) = &entry.value {
                    let inner = extract_camera(nested);
                    if !inner.make.is_empty() {
                        camera.make = inner.make;
                    }
                    if !inner.model.is_empty() {
                        camera.model = inner.model;
                    }
                }
            }
            _ => {}
        }
    }
    camera
}

/// Report whether the block carries `ISOSpeedRatings` and the capture year.
/// A nested `metadata` block, when present, is authoritative.
pub fn check_exif_fields(entries: &[MetadataEntry]) -> ExifFields {
    let mut fields = ExifFields::default();
    for entry in entries {
        match entry.name.as_str() {
            "DateTimeOriginal" => {
                if let Some(value) = entry.as_text() {
                    fields.year = value
                        .get(0..4)
                        .and_then(|year| year.parse::<i32>().ok())
                        .unwrap_or(0);
                }
            }
            "ISOSpeedRatings" => fields.has_iso_speed = true,
            "metadata" => {
                if let MetadataValue::Nested(nested) = &entry.value {
                    return check_exif_fields(nested);
                }
            }
            _ => {}
        }
    }
    fields
}

fn trim_value(value: &str) -> &str {
    value.trim_matches(|ch| ch == ' ' || ch == '\n')
}
