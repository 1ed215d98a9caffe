//! Pattern-table extraction. Patterns per field are tried in order and the
//! first hit wins.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

use crate::models::{FieldMap, MetadataField};
use crate::utils::text::truncate_chars;

const HEADER_CHARS: usize = 500;
const SUBJECT_MAX_CHARS: usize = 100;

/// Keyword (lower-case) to canonical document type, in priority order.
pub const DOCUMENT_TYPES: &[(&str, &str)] = &[
    ("umowa", "UMOWA"),
    ("porozumienie", "POROZUMIENIE"),
    ("aneks", "ANEKS"),
    ("appendix", "ANEKS"),
    ("agreement", "UMOWA"),
    ("contract", "UMOWA"),
    ("protokół", "PROTOKÓŁ"),
    ("protokol", "PROTOKÓŁ"),
    ("protocol", "PROTOKÓŁ"),
    ("faktura", "FAKTURA"),
    ("invoice", "FAKTURA"),
    ("rechnung", "FAKTURA"),
    ("rachunek", "RACHUNEK"),
    ("bill", "RACHUNEK"),
    ("paragon", "PARAGON"),
    ("wezwanie", "WEZWANIE"),
    ("zaświadczenie", "ZAŚWIADCZENIE"),
    ("zaswiadczenie", "ZAŚWIADCZENIE"),
    ("certificate", "ZAŚWIADCZENIE"),
    ("decyzja", "DECYZJA"),
    ("decision", "DECYZJA"),
    ("postanowienie", "POSTANOWIENIE"),
    ("resolution", "UCHWAŁA"),
    ("uchwała", "UCHWAŁA"),
    ("request", "WNIOSEK"),
    ("wniosek", "WNIOSEK"),
    ("appeal", "ODWOŁANIE"),
    ("odwołanie", "ODWOŁANIE"),
    ("odwolanie", "ODWOŁANIE"),
    ("complaint", "SKARGA"),
    ("skarga", "SKARGA"),
    ("letter", "PISMO"),
    ("pismo", "PISMO"),
    ("memo", "NOTATKA"),
    ("notatka", "NOTATKA"),
    ("report", "SPRAWOZDANIE"),
    ("sprawozdanie", "SPRAWOZDANIE"),
    ("statement", "OŚWIADCZENIE"),
    ("oświadczenie", "OŚWIADCZENIE"),
    ("oswiadczenie", "OŚWIADCZENIE"),
];

const MONTHS: &[(&str, u32)] = &[
    ("stycznia", 1), ("lutego", 2), ("marca", 3), ("kwietnia", 4), ("maja", 5), ("czerwca", 6),
    ("lipca", 7), ("sierpnia", 8), ("września", 9), ("wrzesnia", 9), ("października", 10),
    ("pazdziernika", 10), ("listopada", 11), ("grudnia", 12),
    ("styczeń", 1), ("luty", 2), ("marzec", 3), ("kwiecień", 4), ("maj", 5), ("czerwiec", 6),
    ("lipiec", 7), ("sierpień", 8), ("wrzesień", 9), ("październik", 10), ("listopad", 11),
    ("grudzień", 12),
    ("january", 1), ("february", 2), ("march", 3), ("april", 4), ("may", 5), ("june", 6),
    ("july", 7), ("august", 8), ("september", 9), ("october", 10), ("november", 11),
    ("december", 12),
];

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("metadata pattern should compile")
}

static TYPE_KEYWORDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    DOCUMENT_TYPES
        .iter()
        .map(|(keyword, canonical)| (compile(&format!(r"\b{}\b", regex::escape(keyword))), *canonical))
        .collect()
});

static YMD_DATE: LazyLock<Regex> = LazyLock::new(|| compile(r"\b(\d{4})[/.\-](\d{1,2})[/.\-](\d{1,2})\b"));
static DMY_DATE: LazyLock<Regex> = LazyLock::new(|| compile(r"\b(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4})\b"));
static NAMED_MONTH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    let names: Vec<&str> = MONTHS.iter().map(|(name, _)| *name).collect();
    compile(&format!(r"(?i)\b(\d{{1,2}})[ .]({})[ .](\d{{4}})\b", names.join("|")))
});

static NUMBER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:nr|numer|znak|sygn\.?|l\.dz\.?)[ :]*([A-Za-z0-9.\-/]+)\b",
        r"(?i)\b(?:no\.|number)[ :]*([A-Za-z0-9.\-/]+)\b",
        r"(?i)\bFV[ :]*([A-Za-z0-9.\-/]+)\b",
        r"(?i)\bfaktura[ :]*(?:nr|numer|no\.|number)?[ :]*([A-Za-z0-9.\-/]+)\b",
        r"(?i)\binvoice[ :]*(?:nr|numer|no\.|number)?[ :]*([A-Za-z0-9.\-/]+)\b",
        r"(?i)\bumowa[ :]*(?:nr|numer|no\.|number)?[ :]*([A-Za-z0-9.\-/]+)\b",
    ]
    .into_iter()
    .map(compile)
    .collect()
});

static SIGNATURE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:sygn\.?|sygnatura)[ :]*(?:akt)?[ :]*([A-Za-z0-9.\-/]+)\b",
        r"\b([A-Z]{2,4}[ /][A-Za-z0-9]{1,4}[ /][0-9]{1,5}[ /][0-9]{1,5})\b",
    ]
    .into_iter()
    .map(compile)
    .collect()
});

static SENDER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:od|nadawca|wykonawca|zleceniobiorca|usługodawca)[:\s]+([A-ZŻŹĆĄŚĘŁÓŃ][^.\n]{5,50})",
        r"(?i)\b(?:do|odbiorca|zamawiający|zleceniodawca|usługobiorca)[:\s]+([A-ZŻŹĆĄŚĘŁÓŃ][^.\n]{5,50})",
        r"(?i)\b([A-ZŻŹĆĄŚĘŁÓŃ][A-ZŻŹĆĄŚĘŁÓŃ ]{2,}(?:SP\. Z O\.O\.|SP\.|S\.A\.|Z O\.O\.))",
        r"(?i)\b((?:spółka|przedsiębiorstwo|firma|zakład|centrum|biuro)[^\n.]{5,50})",
    ]
    .into_iter()
    .map(compile)
    .collect()
});

static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\b(?:ul\.|ulica|al\.|aleja)[^\n,]{2,30},[^\n]{0,30}?\d{2}-\d{3}"));

static SUBJECT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:dotyczy|dot\.|w sprawie|temat|przedmiot|sprawa)[:\s]+([^\n.]{10,100})",
        r"(?i)(?:sprawa|dot\.):([^\n.]{5,100})",
        r"(?i)\b(?:subject|regarding|re)[:\s]+([^\n.]{5,100})",
    ]
    .into_iter()
    .map(compile)
    .collect()
});

/// Stateless rule-based extractor over raw OCR text.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedExtractor;

impl RuleBasedExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Best-effort values; fields with no match are absent from the map.
    pub fn extract(&self, text: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        if text.trim().is_empty() {
            return fields;
        }

        let document_type = find_document_type(text);
        let candidates = [
            (MetadataField::Date, extract_date(text)),
            (MetadataField::DocumentNumber, first_capture(&NUMBER_PATTERNS, text)),
            (MetadataField::CaseSignature, first_capture(&SIGNATURE_PATTERNS, text)),
            (MetadataField::SenderRecipient, extract_sender_recipient(text)),
            (MetadataField::Subject, extract_subject(text, document_type)),
            (MetadataField::DocumentType, document_type.map(str::to_string)),
        ];

        for (field, value) in candidates {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                fields.insert(field, value);
            }
        }
        fields
    }
}

/// Whole-word keyword lookup, header first, then the full text.
pub fn find_document_type(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    let header = truncate_chars(&lower, HEADER_CHARS);

    let found = [header, lower.as_str()].into_iter().find_map(|haystack| {
        TYPE_KEYWORDS
            .iter()
            .find(|(pattern, _)| pattern.is_match(haystack))
            .map(|(_, canonical)| *canonical)
    });
    found
}

fn format_date(year: i32, month: u32, day: u32) -> Option<String> {
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Numeric forms first, then month names. Output is `YYYY-MM-DD`.
pub fn extract_date(text: &str) -> Option<String> {
    let numeric = YMD_DATE
        .captures_iter(text)
        .find_map(|c| format_date(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?))
        .or_else(|| {
            DMY_DATE
                .captures_iter(text)
                .find_map(|c| format_date(c[3].parse().ok()?, c[2].parse().ok()?, c[1].parse().ok()?))
        });
    if numeric.is_some() {
        return numeric;
    }

    NAMED_MONTH_DATE.captures_iter(text).find_map(|c| {
        let month_name = c[2].to_lowercase();
        let month = MONTHS.iter().find(|(name, _)| *name == month_name)?.1;
        format_date(c[3].parse().ok()?, month, c[1].parse().ok()?)
    })
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|p| p.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

pub fn extract_sender_recipient(text: &str) -> Option<String> {
    if let Some(found) = first_capture(&SENDER_PATTERNS, text) {
        return Some(found);
    }

    // Organization name usually sits on the line right above its address.
    let address = ADDRESS.find(text)?;
    let before = text[..address.start()].trim();
    let line = before.lines().last()?.trim();
    let len = line.chars().count();
    (len > 3 && len < 60).then(|| line.to_string())
}

pub fn extract_subject(text: &str, document_type: Option<&str>) -> Option<String> {
    if let Some(subject) = first_capture(&SUBJECT_PATTERNS, text) {
        return Some(truncate_chars(&subject, SUBJECT_MAX_CHARS).to_string());
    }

    let keyword = document_type?.to_lowercase();
    let pattern = Regex::new(&format!(r"(?i){}[:\s]+([^\n.]{{10,100}})", regex::escape(&keyword))).ok()?;
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| truncate_chars(m.as_str().trim(), SUBJECT_MAX_CHARS).to_string())
}
