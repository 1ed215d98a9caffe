use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const STATUS_OK: &str = "OK";
pub const STATUS_NEEDS_COMPLETION: &str = "needs-completion";
/// The entity capability was missing but every field still got a value.
pub const STATUS_DEGRADED: &str = "degraded";
pub const NEEDS_ATTENTION: &str = "needs-attention";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    Date,
    SenderRecipient,
    Subject,
    DocumentNumber,
    CaseSignature,
    DocumentType,
}

impl MetadataField {
    pub const ALL: [MetadataField; 6] = [
        MetadataField::Date,
        MetadataField::SenderRecipient,
        MetadataField::Subject,
        MetadataField::DocumentNumber,
        MetadataField::CaseSignature,
        MetadataField::DocumentType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Date => "date",
            MetadataField::SenderRecipient => "sender_recipient",
            MetadataField::Subject => "subject",
            MetadataField::DocumentNumber => "document_number",
            MetadataField::CaseSignature => "case_signature",
            MetadataField::DocumentType => "document_type",
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field values without status or color annotations.
pub type FieldMap = BTreeMap<MetadataField, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub date: String,
    pub sender_recipient: String,
    pub subject: String,
    pub document_number: String,
    pub case_signature: String,
    pub document_type: String,
    pub status: String,
    #[serde(default)]
    pub colors: BTreeMap<MetadataField, String>,
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self {
            status: STATUS_OK.to_string(),
            ..Default::default()
        }
    }

    pub fn get(&self, field: MetadataField) -> &str {
        match field {
            MetadataField::Date => &self.date,
            MetadataField::SenderRecipient => &self.sender_recipient,
            MetadataField::Subject => &self.subject,
            MetadataField::DocumentNumber => &self.document_number,
            MetadataField::CaseSignature => &self.case_signature,
            MetadataField::DocumentType => &self.document_type,
        }
    }

    fn slot_mut(&mut self, field: MetadataField) -> &mut String {
        match field {
            MetadataField::Date => &mut self.date,
            MetadataField::SenderRecipient => &mut self.sender_recipient,
            MetadataField::Subject => &mut self.subject,
            MetadataField::DocumentNumber => &mut self.document_number,
            MetadataField::CaseSignature => &mut self.case_signature,
            MetadataField::DocumentType => &mut self.document_type,
        }
    }

    /// Unconditional write. Extraction stages go through [`MetadataRecord::fill`].
    pub fn set(&mut self, field: MetadataField, value: impl Into<String>) {
        *self.slot_mut(field) = value.into();
    }

    pub fn is_empty(&self, field: MetadataField) -> bool {
        self.get(field).trim().is_empty()
    }

    /// First-non-empty-wins: writes `value` only when the field is still empty
    /// and the value carries something. Returns whether the write happened.
    pub fn fill(&mut self, field: MetadataField, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() || !self.is_empty(field) {
            return false;
        }
        *self.slot_mut(field) = value.to_string();
        true
    }

    pub fn fill_from(&mut self, fields: &FieldMap) -> usize {
        fields
            .iter()
            .filter(|(field, value)| self.fill(**field, value))
            .count()
    }

    pub fn empty_fields(&self) -> Vec<MetadataField> {
        MetadataField::ALL
            .into_iter()
            .filter(|field| self.is_empty(*field))
            .collect()
    }

    pub fn fields(&self) -> FieldMap {
        MetadataField::ALL
            .into_iter()
            .map(|field| (field, self.get(field).to_string()))
            .collect()
    }

    /// Marks every still-empty field and derives the overall status.
    pub fn finalize(&mut self, degraded: bool) {
        self.colors = self
            .empty_fields()
            .into_iter()
            .map(|field| (field, NEEDS_ATTENTION.to_string()))
            .collect();

        self.status = if !self.colors.is_empty() {
            STATUS_NEEDS_COMPLETION
        } else if degraded {
            STATUS_DEGRADED
        } else {
            STATUS_OK
        }
        .to_string();
    }

    pub fn needs_review(&self) -> bool {
        self.status != STATUS_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_never_overwrites() {
        let mut record = MetadataRecord::new();
        assert!(record.fill(MetadataField::Date, "2024-01-05"));
        assert!(!record.fill(MetadataField::Date, "1999-12-31"));
        assert_eq!(record.date, "2024-01-05");

        assert!(!record.fill(MetadataField::Subject, "   "));
        assert!(record.is_empty(MetadataField::Subject));
    }

    #[test]
    fn test_finalize_marks_empty_fields() {
        let mut record = MetadataRecord::new();
        record.set(MetadataField::Date, "2024-01-05");
        record.finalize(false);

        assert_eq!(record.status, STATUS_NEEDS_COMPLETION);
        assert_eq!(record.colors.len(), 5);
        assert!(!record.colors.contains_key(&MetadataField::Date));
        assert_eq!(record.colors[&MetadataField::Subject], NEEDS_ATTENTION);
    }

    #[test]
    fn test_finalize_complete_record() {
        let mut record = MetadataRecord::new();
        for field in MetadataField::ALL {
            record.set(field, "x-value");
        }
        record.finalize(false);
        assert_eq!(record.status, STATUS_OK);
        assert!(record.colors.is_empty());

        record.finalize(true);
        assert_eq!(record.status, STATUS_DEGRADED);
        assert!(record.colors.is_empty());
    }

    #[test]
    fn test_serialized_field_names() {
        let mut record = MetadataRecord::new();
        record.finalize(false);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "needs-completion");
        assert_eq!(json["colors"]["sender_recipient"], "needs-attention");
    }
}
