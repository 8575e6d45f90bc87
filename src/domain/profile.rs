//! Metadata profiles.
//!
//! A profile is a reusable schema of custom metadata fields. Ingestion uses it
//! to fill defaults and reject values that do not fit the field definitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::value::{Metadata, MetadataValue};
use crate::error::{ArchiveError, Result};

/// Type of a profile field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Single-line text
    Text,

    /// Long-form text
    Textarea,

    Number,

    /// Calendar date (`YYYY-MM-DD`)
    Date,

    /// Date and time (RFC 3339 or `YYYY-MM-DDTHH:MM:SS`)
    Datetime,

    Boolean,

    /// One value out of `options`
    Select,

    /// Any subset of `options`
    Multiselect,

    /// Free list of tags
    Tags,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Boolean => "boolean",
            FieldType::Select => "select",
            FieldType::Multiselect => "multiselect",
            FieldType::Tags => "tags",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(FieldType::Text),
            "textarea" | "long-text" | "longtext" => Ok(FieldType::Textarea),
            "number" => Ok(FieldType::Number),
            "date" => Ok(FieldType::Date),
            "datetime" => Ok(FieldType::Datetime),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "select" => Ok(FieldType::Select),
            "multiselect" => Ok(FieldType::Multiselect),
            "tags" | "tag-list" => Ok(FieldType::Tags),
            _ => Err(ArchiveError::InvalidArgument(format!("Unknown field type: {}", s))),
        }
    }
}

/// Definition of one custom metadata field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataField {
    /// Key used in `custom_metadata`
    pub name: String,

    /// Label shown to people
    pub display_name: String,

    pub field_type: FieldType,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default_value: Option<MetadataValue>,

    /// Allowed values for select/multiselect fields
    #[serde(default)]
    pub options: Option<Vec<String>>,

    #[serde(default)]
    pub description: Option<String>,

    /// Regex every text value must match
    #[serde(default)]
    pub validation_pattern: Option<String>,
}

impl MetadataField {
    /// Create a field with no constraints
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            field_type,
            required: false,
            default_value: None,
            options: None,
            description: None,
            validation_pattern: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<MetadataValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_options(mut self, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.validation_pattern = Some(pattern.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check one value against this field's type, options and pattern
    pub fn check(&self, value: &MetadataValue) -> std::result::Result<(), String> {
        match self.field_type {
            FieldType::Text | FieldType::Textarea => {
                let text = expect_text(value)?;
                self.check_pattern(text)
            }
            FieldType::Number => match value {
                MetadataValue::Number(_) => Ok(()),
                _ => Err(format!("expected a number, got {}", value.kind())),
            },
            FieldType::Boolean => match value {
                MetadataValue::Bool(_) => Ok(()),
                _ => Err(format!("expected a boolean, got {}", value.kind())),
            },
            FieldType::Date => {
                let text = expect_text(value)?;
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .map_err(|_| format!("'{}' is not a YYYY-MM-DD date", text))?;
                self.check_pattern(text)
            }
            FieldType::Datetime => {
                let text = expect_text(value)?;
                let parsed = DateTime::parse_from_rfc3339(text).is_ok()
                    || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").is_ok();
                if !parsed {
                    return Err(format!("'{}' is not a date-time", text));
                }
                self.check_pattern(text)
            }
            FieldType::Select => {
                let text = expect_text(value)?;
                self.check_option(text)?;
                self.check_pattern(text)
            }
            FieldType::Multiselect | FieldType::Tags => {
                let items = expect_string_list(value)?;
                for item in items {
                    if self.field_type == FieldType::Multiselect {
                        self.check_option(item)?;
                    }
                    self.check_pattern(item)?;
                }
                Ok(())
            }
        }
    }

    fn check_option(&self, text: &str) -> std::result::Result<(), String> {
        match &self.options {
            Some(options) if !options.is_empty() && !options.iter().any(|o| o == text) => {
                Err(format!("'{}' is not one of {:?}", text, options))
            }
            _ => Ok(()),
        }
    }

    fn check_pattern(&self, text: &str) -> std::result::Result<(), String> {
        let Some(pattern) = &self.validation_pattern else {
            return Ok(());
        };
        let re = Regex::new(pattern).map_err(|e| format!("invalid validation pattern: {}", e))?;
        if re.is_match(text) {
            Ok(())
        } else {
            Err(format!("'{}' does not match pattern {}", text, pattern))
        }
    }
}

fn expect_text(value: &MetadataValue) -> std::result::Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected text, got {}", value.kind()))
}

fn expect_string_list(value: &MetadataValue) -> std::result::Result<Vec<&str>, String> {
    let items = value
        .as_list()
        .ok_or_else(|| format!("expected a list, got {}", value.kind()))?;
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.as_str()),
            other => Err(format!("list entries must be text, got {}", other)),
        })
        .collect()
}

/// A value that failed its field definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// A named, reusable metadata schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub fields: Vec<MetadataField>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Create an empty profile with a fresh id
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            fields: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a field; names must be unique within the profile
    pub fn add_field(&mut self, field: MetadataField) -> Result<()> {
        if self.get_field(&field.name).is_some() {
            return Err(ArchiveError::AlreadyExists(format!(
                "Field '{}' already exists in profile '{}'",
                field.name, self.name
            )));
        }
        self.fields.push(field);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Remove a field by name, returning it if present
    pub fn remove_field(&mut self, name: &str) -> Option<MetadataField> {
        let pos = self.fields.iter().position(|f| f.name == name)?;
        self.updated_at = Utc::now();
        Some(self.fields.remove(pos))
    }

    pub fn get_field(&self, name: &str) -> Option<&MetadataField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fill unset fields from their defaults
    pub fn apply_defaults(&self, metadata: &mut Metadata) {
        for field in &self.fields {
            if let Some(default) = &field.default_value {
                metadata
                    .entry(field.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }

    /// Check every present value against its field definition.
    ///
    /// Keys without a matching field are left alone.
    pub fn validate(&self, metadata: &Metadata) -> Vec<FieldViolation> {
        metadata
            .iter()
            .filter_map(|(key, value)| {
                let field = self.get_field(key)?;
                field.check(value).err().map(|reason| FieldViolation {
                    field: key.clone(),
                    reason,
                })
            })
            .collect()
    }

    /// Names of required fields absent from `metadata`
    pub fn missing_required(&self, metadata: &Metadata) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required && !metadata.contains_key(&f.name))
            .map(|f| f.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> Profile {
        let mut profile = Profile::new("Photos", "Photo collection");
        profile
            .add_field(MetadataField::new("title", "Title", FieldType::Text).required())
            .unwrap();
        profile
            .add_field(
                MetadataField::new("rating", "Rating", FieldType::Select)
                    .with_options(["good", "bad"])
                    .with_default("good"),
            )
            .unwrap();
        profile
            .add_field(MetadataField::new("tags", "Tags", FieldType::Tags))
            .unwrap();
        profile
            .add_field(MetadataField::new("shot_on", "Shot on", FieldType::Date))
            .unwrap();
        profile
            .add_field(
                MetadataField::new("code", "Code", FieldType::Text).with_pattern(r"^[A-Z]{3}-\d+$"),
            )
            .unwrap();
        profile
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut profile = sample_profile();
        let err = profile
            .add_field(MetadataField::new("title", "Other", FieldType::Textarea))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::AlreadyExists(_)));
        assert_eq!(profile.fields.len(), 5);
    }

    #[test]
    fn test_remove_and_get_field() {
        let mut profile = sample_profile();
        assert!(profile.remove_field("rating").is_some());
        assert!(profile.get_field("rating").is_none());
        assert!(profile.remove_field("rating").is_none());
    }

    #[test]
    fn test_apply_defaults_keeps_existing() {
        let profile = sample_profile();
        let mut meta = Metadata::new();
        profile.apply_defaults(&mut meta);
        assert_eq!(meta["rating"], MetadataValue::from("good"));

        let mut meta = Metadata::from([("rating".to_string(), MetadataValue::from("bad"))]);
        profile.apply_defaults(&mut meta);
        assert_eq!(meta["rating"], MetadataValue::from("bad"));
    }

    #[test]
    fn test_validate_reports_bad_values() {
        let profile = sample_profile();
        let meta = Metadata::from([
            ("title".to_string(), MetadataValue::from("Sunset")),
            ("rating".to_string(), MetadataValue::from("meh")),
            ("tags".to_string(), MetadataValue::from(vec!["a", "b"])),
            ("shot_on".to_string(), MetadataValue::from("2024-13-40")),
            ("code".to_string(), MetadataValue::from("abc")),
            ("unrelated".to_string(), MetadataValue::from(1)),
        ]);

        let mut bad: Vec<String> = profile.validate(&meta).into_iter().map(|v| v.field).collect();
        bad.sort();
        assert_eq!(bad, vec!["code", "rating", "shot_on"]);
    }

    #[test]
    fn test_missing_required() {
        let profile = sample_profile();
        assert_eq!(profile.missing_required(&Metadata::new()), vec!["title"]);
    }

    #[test]
    fn test_field_type_serde_names() {
        let json = serde_json::to_string(&FieldType::Multiselect).unwrap();
        assert_eq!(json, "\"multiselect\"");
        assert_eq!("long-text".parse::<FieldType>().unwrap(), FieldType::Textarea);
    }

    #[test]
    fn test_profile_json_roundtrip() {
        let profile = sample_profile();
        let json = serde_json::to_string_pretty(&profile).unwrap();
        let back: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }
}
