//! Reduced inline patterns run after the rule tables. Kept separate from
//! `rules` so a regression there still leaves these in place.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{FieldMap, MetadataField, MetadataRecord};

static NUMERIC_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}[./-]\d{1,2}[./-]\d{2,4}").expect("date pattern should compile"));
static POLISH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b\d{1,2}\s+(?:stycznia|lutego|marca|kwietnia|maja|czerwca|lipca|sierpnia|wrze[sś]nia|października|listopada|grudnia)\s+\d{4}\b",
    )
    .expect("date pattern should compile")
});
static SENDER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^(?:Od|Nadawca)\s*:\s*(.+)$").expect("sender pattern should compile"));
static RECIPIENT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^(?:Do|Adresat)\s*:\s*(.+)$").expect("recipient pattern should compile"));
static NUMBER: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        r"(?i)(?:nr|numer)(?:\s+dokumentu)?\s*[:\s-]+([A-Z0-9./\-]+)",
        r"(?i)(?:nr|numer)(?:\s+dokumentu)?\s+([A-Z0-9./\-]+)",
    ]
    .map(|p| Regex::new(p).expect("number pattern should compile"))
});
static SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:sygn\.?\s*akt|sygnatura)\s*[:\s-]*([A-Z0-9./\- ]+)").expect("signature pattern should compile")
});

/// Values for the fields of `record` that are still empty. Dates are kept as
/// they appear in the text.
pub fn safety_net(record: &MetadataRecord, text: &str) -> FieldMap {
    let mut found = FieldMap::new();

    if record.is_empty(MetadataField::Date) {
        if let Some(m) = NUMERIC_DATE.find(text).or_else(|| POLISH_DATE.find(text)) {
            found.insert(MetadataField::Date, m.as_str().to_string());
        }
    }

    if record.is_empty(MetadataField::SenderRecipient) {
        let parties: Vec<&str> = SENDER_LINE
            .captures_iter(text)
            .chain(RECIPIENT_LINE.captures_iter(text))
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .collect();
        if !parties.is_empty() {
            found.insert(MetadataField::SenderRecipient, parties.join(" "));
        }
    }

    if record.is_empty(MetadataField::DocumentNumber) {
        if let Some(number) = NUMBER.iter().find_map(|p| p.captures(text)).and_then(|c| c.get(1)) {
            found.insert(MetadataField::DocumentNumber, number.as_str().trim().to_string());
        }
    }

    if record.is_empty(MetadataField::CaseSignature) {
        if let Some(signature) = SIGNATURE.captures(text).and_then(|c| c.get(1)) {
            found.insert(MetadataField::CaseSignature, signature.as_str().trim().to_string());
        }
    }

    found
}
