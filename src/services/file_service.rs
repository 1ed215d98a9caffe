//! Archive naming and copying.

use chrono::{Datelike, Local};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;
use tracing::{error, info, warn};

use crate::metadata_extraction::ENTITY_MODEL_MISSING;
use crate::models::MetadataRecord;
use crate::services::counter_service::{CounterKey, CounterStore, SynthesisError};
use crate::utils::text::truncate_chars;

pub const ARCHIVE_EXTENSION: &str = "pdf";
const SENDER_MAX_CHARS: usize = 30;
const SUBJECT_MAX_CHARS: usize = 50;

static ILLEGAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("illegal character pattern should compile"));

fn clean(value: &str) -> String {
    ILLEGAL_CHARS.replace_all(value, "").trim().to_string()
}

/// Name used when nothing useful is known about a document.
pub fn fallback_filename(sequence: u64) -> String {
    format!("document-to-verify-{}.{}", sequence, ARCHIVE_EXTENSION)
}

/// Builds `{n}[_{signature}][_{number}-{sender}-{type}-{subject}].pdf`,
/// advancing the counter for `mode` in the current year.
pub fn synthesize_filename(
    record: &MetadataRecord,
    mode: &str,
    counters: &CounterStore,
) -> Result<String, SynthesisError> {
    synthesize_filename_for_year(record, mode, Local::now().year(), counters)
}

pub fn synthesize_filename_for_year(
    record: &MetadataRecord,
    mode: &str,
    year: i32,
    counters: &CounterStore,
) -> Result<String, SynthesisError> {
    let sequence = counters.increment_and_get(&CounterKey::new(mode, year))?;

    let subject = if record.subject == ENTITY_MODEL_MISSING {
        ""
    } else {
        record.subject.as_str()
    };

    let signature = clean(&record.case_signature).replace(' ', "_");
    let number = clean(&record.document_number).replace(' ', "-");
    let sender = clean(&record.sender_recipient).to_uppercase().replace(' ', "-");
    let sender = truncate_chars(&sender, SENDER_MAX_CHARS);
    let doc_type = clean(&record.document_type).to_uppercase().replace(' ', "-");
    let subject = clean(subject).replace(' ', "-");
    let subject = truncate_chars(&subject, SUBJECT_MAX_CHARS);

    let mut name = sequence.to_string();
    if !signature.is_empty() {
        name.push('_');
        name.push_str(&signature);
    }
    let parts: Vec<&str> = [number.as_str(), sender, doc_type.as_str(), subject]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    if !parts.is_empty() {
        name.push('_');
        name.push_str(&parts.join("-"));
    }

    if name == sequence.to_string() {
        return Ok(fallback_filename(sequence));
    }
    Ok(format!("{}.{}", name, ARCHIVE_EXTENSION))
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_archive_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name
            .chars()
            .any(|c| c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
}

/// Copies `source` into `dest_dir` under a sanitized `desired_name` and
/// returns that name. Problems are logged and give `None`; the source file is
/// never touched.
pub async fn archive_copy(source: &Path, dest_dir: &Path, desired_name: &str) -> Option<String> {
    let Some(base) = Path::new(desired_name).file_name().and_then(|n| n.to_str()) else {
        warn!("Skipping {}: no usable file name in {:?}", source.display(), desired_name);
        return None;
    };

    let safe_name = sanitize_archive_name(base);
    if !is_safe_filename(&safe_name) {
        warn!("Skipping {}: file name {:?} is not allowed", source.display(), safe_name);
        return None;
    }

    let dest = dest_dir.join(&safe_name);
    match copy_preserving_mtime(source, &dest).await {
        Ok(()) => {
            info!("Archived {} as {}", source.display(), safe_name);
            Some(safe_name)
        }
        Err(e) => {
            error!("Failed to copy {} to {}: {}", source.display(), dest.display(), e);
            None
        }
    }
}

async fn copy_preserving_mtime(source: &Path, dest: &Path) -> std::io::Result<()> {
    fs::copy(source, dest).await?;
    let modified = fs::metadata(source).await?.modified()?;

    let dest: PathBuf = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&dest)?
            .set_modified(modified)
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Creates the archive directory if needed.
pub async fn prepare_output_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir).await?;
    info!("Ensured archive directory exists: {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataField;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn sample_record() -> MetadataRecord {
        let mut record = MetadataRecord::new();
        record.set(MetadataField::CaseSignature, "Sygnatura");
        record.set(MetadataField::DocumentNumber, "123");
        record.set(MetadataField::SenderRecipient, "Ministerstwo");
        record.set(MetadataField::DocumentType, "Umowa");
        record.set(MetadataField::Subject, "w sprawie");
        record
    }

    #[test]
    fn test_synthesize_increments_per_call() {
        let counters = CounterStore::new();
        let record = sample_record();

        let first = synthesize_filename_for_year(&record, "KP", 2024, &counters).unwrap();
        let second = synthesize_filename_for_year(&record, "KP", 2024, &counters).unwrap();

        assert_eq!(first, "1_Sygnatura_123-MINISTERSTWO-UMOWA-w-sprawie.pdf");
        assert_eq!(second, "2_Sygnatura_123-MINISTERSTWO-UMOWA-w-sprawie.pdf");
        assert_eq!(counters.get(&CounterKey::new("KP", 2024)), 2);
    }

    #[test]
    fn test_synthesize_cleans_and_truncates() {
        let counters = CounterStore::new();
        let mut record = MetadataRecord::new();
        record.set(MetadataField::CaseSignature, "I C 12/20");
        record.set(MetadataField::DocumentNumber, "FV 1/2024");
        record.set(MetadataField::SenderRecipient, "Przedsiębiorstwo Usług Komunalnych Sp. z o.o.");
        record.set(MetadataField::Subject, "a".repeat(80));

        let name = synthesize_filename_for_year(&record, "", 2024, &counters).unwrap();

        assert_eq!(
            name,
            format!("1_I_C_1220_FV-12024-PRZEDSIĘBIORSTWO-USŁUG-KOMUNAL-{}.pdf", "a".repeat(50))
        );
        assert_eq!(counters.get(&CounterKey::new("LP", 2024)), 1);
    }

    #[test]
    fn test_synthesize_fallback_uses_counter() {
        let counters = CounterStore::new();
        let mut record = MetadataRecord::new();
        record.set(MetadataField::Date, "2024-01-01");
        record.set(MetadataField::Subject, ENTITY_MODEL_MISSING);

        let name = synthesize_filename_for_year(&record, "KP", 2024, &counters).unwrap();
        assert_eq!(name, "document-to-verify-1.pdf");
    }

    #[test]
    fn test_sanitize_archive_name() {
        assert_eq!(sanitize_archive_name("bad\nname.txt"), "bad_name.txt");
        assert_eq!(sanitize_archive_name("żółć.txt"), "____.txt");
        assert_eq!(sanitize_archive_name("ok-name_1.pdf"), "ok-name_1.pdf");
    }

    #[tokio::test]
    async fn test_archive_copy() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("scan.pdf");
        std::fs::write(&source, b"%PDF-1.4 test").unwrap();
        let old = SystemTime::now() - Duration::from_secs(86_400);
        std::fs::File::options().write(true).open(&source).unwrap().set_modified(old).unwrap();

        let dest = temp_dir.path().join("out");
        prepare_output_dir(&dest).await.unwrap();

        let name = archive_copy(&source, &dest, "bad\nname.txt").await;
        assert_eq!(name.as_deref(), Some("bad_name.txt"));
        let copied = dest.join("bad_name.txt");
        assert_eq!(std::fs::read(&copied).unwrap(), b"%PDF-1.4 test");
        assert_eq!(
            std::fs::metadata(&copied).unwrap().modified().unwrap(),
            std::fs::metadata(&source).unwrap().modified().unwrap()
        );
        assert!(source.exists());

        assert_eq!(archive_copy(&source, &dest, "żółć.txt").await.as_deref(), Some("____.txt"));
        assert!(dest.join("____.txt").exists());
    }

    #[tokio::test]
    async fn test_archive_copy_skips_bad_input() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("scan.pdf");
        std::fs::write(&source, b"data").unwrap();

        assert_eq!(archive_copy(&source, temp_dir.path(), "..").await, None);
        assert_eq!(archive_copy(&source, temp_dir.path(), "").await, None);
        assert_eq!(
            archive_copy(&temp_dir.path().join("missing.pdf"), temp_dir.path(), "x.pdf").await,
            None
        );
        assert_eq!(
            archive_copy(&source, temp_dir.path(), "nested/dir/name.pdf").await.as_deref(),
            Some("name.pdf")
        );
    }
}
