use super::*;
use tempfile::TempDir;

fn fields(pairs: &[(MetadataField, &str)]) -> FieldMap {
    pairs.iter().map(|(f, v)| (*f, v.to_string())).collect()
}

/// Embeds by counting a fixed keyword list, so similarity is easy to reason about.
struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        let keywords = ["umowa", "faktura", "protokół"];
        texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                keywords.iter().map(|k| lower.matches(k).count() as f32).collect()
            })
            .collect()
    }
}

#[tokio::test]
async fn test_missing_file_is_empty_memory() {
    let temp_dir = TempDir::new().unwrap();
    let memory = ContextMemory::load(temp_dir.path().join("absent.json")).await;
    assert_eq!(memory.document_count().await, 0);
    assert_eq!(memory.correction_count().await, 0);
}

#[tokio::test]
async fn test_corrupt_file_is_empty_memory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("memory.json");
    std::fs::write(&path, "{ not json").unwrap();

    let memory = ContextMemory::load(&path).await;
    assert_eq!(memory.document_count().await, 0);
}

#[tokio::test]
async fn test_write_through_persistence() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("memory.json");

    let memory = ContextMemory::load(&path).await;
    let long_text = "a".repeat(3000);
    memory
        .add_document(&long_text, &fields(&[(MetadataField::DocumentType, "UMOWA")]))
        .await
        .unwrap();

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["documents"].as_array().unwrap().len(), 1);
    assert_eq!(raw["corrections"].as_array().unwrap().len(), 0);
    assert_eq!(raw["documents"][0]["text_fragment"].as_str().unwrap().len(), 2000);
    assert_eq!(raw["documents"][0]["metadata"]["document_type"], "UMOWA");

    let reloaded = ContextMemory::load(&path).await;
    assert_eq!(reloaded.document_count().await, 1);
}

#[tokio::test]
async fn test_ring_bounds() {
    let memory = ContextMemory::in_memory();
    for i in 0..105 {
        memory.add_document(&format!("doc {}", i), &FieldMap::new()).await.unwrap();
    }
    assert_eq!(memory.document_count().await, MAX_DOCUMENTS);

    for i in 0..205 {
        let original = fields(&[(MetadataField::Subject, "")]);
        let corrected = fields(&[(MetadataField::Subject, &format!("subject {}", i))]);
        memory.add_correction(&original, &corrected, "text").await.unwrap();
    }
    assert_eq!(memory.correction_count().await, MAX_CORRECTIONS);
}

#[tokio::test]
async fn test_add_correction_records_only_real_changes() {
    let memory = ContextMemory::in_memory();
    let original = fields(&[
        (MetadataField::Date, "2024-01-01"),
        (MetadataField::Subject, ""),
        (MetadataField::DocumentNumber, "12"),
    ]);

    let unchanged = original.clone();
    assert!(!memory.add_correction(&original, &unchanged, "text").await.unwrap());

    let corrected = fields(&[
        (MetadataField::Date, "2024-01-02"),
        (MetadataField::Subject, ""),
        (MetadataField::DocumentNumber, "12"),
        (MetadataField::SenderRecipient, "ACME"),
    ]);
    assert!(memory.add_correction(&original, &corrected, "text").await.unwrap());

    let state = memory.state.lock().await;
    let changed = &state.data.corrections[0].changed_fields;
    assert_eq!(changed.len(), 1);
    assert_eq!(
        changed[&MetadataField::Date],
        FieldChange {
            original: "2024-01-01".to_string(),
            corrected: "2024-01-02".to_string()
        }
    );
}

#[tokio::test]
async fn test_find_similar_documents_ranking() {
    let memory = ContextMemory::in_memory().with_embedder(Arc::new(KeywordEmbedder));
    memory.add_document("faktura faktura", &FieldMap::new()).await.unwrap();
    memory.add_document("umowa umowa umowa", &FieldMap::new()).await.unwrap();
    memory.add_document("umowa faktura", &FieldMap::new()).await.unwrap();
    memory.add_document("protokół", &FieldMap::new()).await.unwrap();

    let similar = memory.find_similar_documents("umowa", 3).await;

    assert_eq!(similar.len(), 2);
    assert_eq!(similar[0].document.text_fragment, "umowa umowa umowa");
    assert_eq!(similar[1].document.text_fragment, "umowa faktura");
    assert!(similar[0].similarity > similar[1].similarity);
    assert!(similar.iter().all(|s| s.similarity > DOCUMENT_SIMILARITY_FLOOR));

    let capped = memory.find_similar_documents("umowa faktura", 1).await;
    assert_eq!(capped.len(), 1);
    assert_eq!(capped[0].document.text_fragment, "umowa faktura");
}

#[tokio::test]
async fn test_find_relevant_corrections_threshold() {
    let memory = ContextMemory::in_memory();
    let original = fields(&[(MetadataField::SenderRecipient, "")]);
    let corrected = fields(&[(MetadataField::SenderRecipient, "Urząd Miasta Gdańsk")]);
    memory
        .add_correction(&original, &corrected, "Faktura VAT nr 12/2024 dla Urzędu Miasta")
        .await
        .unwrap();

    let hit = memory
        .find_relevant_corrections("Faktura VAT nr 13/2024 dla Urzędu Miasta", MetadataField::SenderRecipient)
        .await;
    assert_eq!(hit.as_deref(), Some("Urząd Miasta Gdańsk"));

    let miss = memory
        .find_relevant_corrections("zzzzzzzzzzzzzzzzzzzzzzzz", MetadataField::SenderRecipient)
        .await;
    assert_eq!(miss, None);

    let other_field = memory
        .find_relevant_corrections("Faktura VAT nr 12/2024 dla Urzędu Miasta", MetadataField::Date)
        .await;
    assert_eq!(other_field, None);
}

#[tokio::test]
async fn test_relevant_corrections_tie_keeps_first() {
    let memory = ContextMemory::in_memory().with_metric(FuzzyMetric::Levenshtein);
    let original = fields(&[(MetadataField::DocumentType, "")]);
    for value in ["FAKTURA", "RACHUNEK"] {
        let corrected = fields(&[(MetadataField::DocumentType, value)]);
        memory.add_correction(&original, &corrected, "same text").await.unwrap();
    }

    let hit = memory
        .find_relevant_corrections("same text", MetadataField::DocumentType)
        .await;
    assert_eq!(hit.as_deref(), Some("FAKTURA"));
}

#[tokio::test]
async fn test_apply_contextual_corrections_fills_short_fields_only() {
    let memory = ContextMemory::in_memory();
    let text = "Protokół odbioru prac nr 5";
    let original = fields(&[(MetadataField::Subject, ""), (MetadataField::Date, "")]);
    let corrected = fields(&[
        (MetadataField::Subject, "odbiór prac"),
        (MetadataField::Date, "2023-05-05"),
    ]);
    memory.add_correction(&original, &corrected, text).await.unwrap();

    let mut record = MetadataRecord::new();
    record.set(MetadataField::Subject, "ab");
    record.set(MetadataField::Date, "2024-02-02");

    let applied = memory.apply_contextual_corrections(&mut record, text).await;

    assert_eq!(applied, 1);
    assert_eq!(record.subject, "odbiór prac");
    assert_eq!(record.date, "2024-02-02");
}
