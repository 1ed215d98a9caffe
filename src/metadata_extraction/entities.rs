use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{FieldMap, MetadataField};

/// Labels an entity extractor may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityLabel {
    Date,
    Organization,
    SubjectTitle,
    DocNumber,
    CaseSignature,
    DocType,
}

impl EntityLabel {
    pub fn field(&self) -> MetadataField {
        match self {
            EntityLabel::Date => MetadataField::Date,
            EntityLabel::Organization => MetadataField::SenderRecipient,
            EntityLabel::SubjectTitle => MetadataField::Subject,
            EntityLabel::DocNumber => MetadataField::DocumentNumber,
            EntityLabel::CaseSignature => MetadataField::CaseSignature,
            EntityLabel::DocType => MetadataField::DocumentType,
        }
    }
}

pub type Entities = HashMap<EntityLabel, Vec<String>>;

/// Statistical entity recognition capability.
pub trait EntityExtractor: Send + Sync {
    fn extract_entities(&self, text: &str) -> Entities;
}

#[derive(Error, Debug)]
pub enum EntityModelError {
    #[error("Failed to read entity model {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Entity model is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern for {label:?}: {source}")]
    Pattern {
        label: EntityLabel,
        #[source]
        source: regex::Error,
    },
}

/// Entity model described by a JSON file mapping each label to a list of
/// regular expressions. Capture group 1 is the entity when present, otherwise
/// the whole match.
#[derive(Debug, Clone)]
pub struct PatternEntityModel {
    patterns: Vec<(EntityLabel, Regex)>,
}

impl PatternEntityModel {
    pub fn from_json(raw: &str) -> Result<Self, EntityModelError> {
        let table: HashMap<EntityLabel, Vec<String>> = serde_json::from_str(raw)?;

        let mut patterns = Vec::new();
        for (label, sources) in table {
            for source in sources {
                let regex = Regex::new(&source).map_err(|source| EntityModelError::Pattern { label, source })?;
                patterns.push((label, regex));
            }
        }
        Ok(Self { patterns })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EntityModelError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| EntityModelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let model = Self::from_json(&raw)?;
        info!("Loaded entity model {} with {} patterns", path.display(), model.patterns.len());
        Ok(model)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl EntityExtractor for PatternEntityModel {
    fn extract_entities(&self, text: &str) -> Entities {
        let mut entities = Entities::new();
        for (label, regex) in &self.patterns {
            for captures in regex.captures_iter(text) {
                let Some(span) = captures.get(1).or_else(|| captures.get(0)) else {
                    continue;
                };
                let value = span.as_str().replace('\n', " ").trim().to_string();
                if !value.is_empty() {
                    entities.entry(*label).or_default().push(value);
                }
            }
        }
        debug!("Entity model found {} labels", entities.len());
        entities
    }
}

/// Joins every label's entities with a single space and maps them to fields.
pub fn entities_to_fields(entities: &Entities) -> FieldMap {
    entities
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(label, values)| (label.field(), values.join(" ")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_model_extracts_labelled_spans() {
        let model = PatternEntityModel::from_json(
            r#"{
                "DATE": ["\\d{4}-\\d{2}-\\d{2}"],
                "ORGANIZATION": ["(?m)^Firma:\\s*(.+)$"],
                "DOC_NUMBER": ["nr (\\d+)"]
            }"#,
        )
        .unwrap();
        assert_eq!(model.pattern_count(), 3);

        let entities = model.extract_entities("Firma: ACME\nnr 12 i nr 13\n2024-03-01");
        assert_eq!(entities[&EntityLabel::Date], vec!["2024-03-01"]);
        assert_eq!(entities[&EntityLabel::Organization], vec!["ACME"]);
        assert_eq!(entities[&EntityLabel::DocNumber], vec!["12", "13"]);

        let fields = entities_to_fields(&entities);
        assert_eq!(fields[&MetadataField::DocumentNumber], "12 13");
        assert_eq!(fields[&MetadataField::SenderRecipient], "ACME");
    }

    #[test]
    fn test_invalid_model_is_rejected() {
        assert!(matches!(
            PatternEntityModel::from_json(r#"{"DATE": ["("]}"#),
            Err(EntityModelError::Pattern { label: EntityLabel::Date, .. })
        ));
        assert!(matches!(
            PatternEntityModel::from_json(r#"{"PERSON": ["x"]}"#),
            Err(EntityModelError::Json(_))
        ));
    }
}
