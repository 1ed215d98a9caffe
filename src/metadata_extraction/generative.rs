//! Optional generative metadata stage backed by a local Ollama server.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context_memory::ContextMemory;
use crate::models::{FieldMap, MetadataField, MetadataRecord};
use crate::utils::text::truncate_chars;

pub const PROMPT_TEXT_CHARS: usize = 1500;
pub const EXAMPLE_FRAGMENT_CHARS: usize = 200;
pub const CORRECTION_TEXT_CHARS: usize = 800;
const MAX_EXAMPLES: usize = 2;
const SIMILAR_CANDIDATES: usize = 3;
const ASSISTANT_MARKER: &str = "<|assistant|>";

/// Fields the model is asked for. Case signatures are never generated.
pub const GENERATED_FIELDS: [MetadataField; 5] = [
    MetadataField::DocumentType,
    MetadataField::Date,
    MetadataField::SenderRecipient,
    MetadataField::Subject,
    MetadataField::DocumentNumber,
];

/// Response keys, canonical names first. Aliases are only used when the
/// canonical key is absent.
const RESPONSE_KEYS: &[(&str, MetadataField)] = &[
    ("document_type", MetadataField::DocumentType),
    ("date", MetadataField::Date),
    ("sender_recipient", MetadataField::SenderRecipient),
    ("subject", MetadataField::Subject),
    ("document_number", MetadataField::DocumentNumber),
    ("temat", MetadataField::Subject),
    ("topic", MetadataField::Subject),
    ("typ_dokumentu", MetadataField::DocumentType),
    ("data", MetadataField::Date),
    ("nadawca_odbiorca", MetadataField::SenderRecipient),
    ("numer_dokumentu", MetadataField::DocumentNumber),
];

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern should compile"));

pub const DEFAULT_METADATA_PROMPT: &str = "<|system|>
You analyse scanned legal and business correspondence. Read the document and extract:
1. DOCUMENT TYPE (for example contract, invoice, protocol, annex, summons, statement)
2. DATE the document was issued or signed, formatted YYYY-MM-DD
3. SENDER/RECIPIENT: the company, institution or person issuing or receiving it
4. SUBJECT: a short description of what the document concerns
5. DOCUMENT NUMBER (contract number, invoice number, reference) if present{similar_examples}

Answer ONLY with a JSON object in this shape:
{
  \"document_type\": \"TYPE\",
  \"date\": \"YYYY-MM-DD\",
  \"sender_recipient\": \"NAME\",
  \"subject\": \"DESCRIPTION\",
  \"document_number\": \"NUMBER\"
}

If the document contains several dates pick the one most likely to be the document date.
Use an empty string \"\" for anything the text does not contain.
<|user|>
{document_text}
<|assistant|>";

pub const DEFAULT_CORRECTION_PROMPT: &str = "<|system|>
You review metadata extracted from a scanned document and fix mistakes.
Check the values against the text fragment, paying attention to the date format (YYYY-MM-DD),
the document type, the sender or recipient and the subject. Answer ONLY with a JSON object:
{
  \"document_type\": \"TYPE\",
  \"date\": \"YYYY-MM-DD\",
  \"sender_recipient\": \"NAME\",
  \"subject\": \"DESCRIPTION\",
  \"document_number\": \"NUMBER\"
}
<|user|>
Extracted metadata:
Document type: {document_type}
Date: {date}
Sender/recipient: {sender_recipient}
Subject: {subject}
Document number: {document_number}

Text fragment:
{document_text}
<|assistant|>";

#[derive(Error, Debug)]
pub enum GenerativeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Text generation capability.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerativeError>;

    async fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

pub struct OllamaClient {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Result<Self, GenerativeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| GenerativeError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.2,
            max_tokens: 500,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, GenerativeError> {
        Self::new(&config.llm_endpoint, &config.llm_model)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl GenerativeModel for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerativeError> {
        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerativeError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerativeError::Api(format!("HTTP {}: {}", status, body)));
        }

        let body: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| GenerativeError::Parse(e.to_string()))?;
        Ok(body.response)
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Ollama at {} is not reachable: {}", self.endpoint, e);
                false
            }
        }
    }
}

/// Prompt building, response validation and memory bookkeeping around a
/// [`GenerativeModel`].
pub struct GenerativeStage {
    model: Arc<dyn GenerativeModel>,
    memory: ContextMemory,
    metadata_prompt: String,
    correction_prompt: String,
}

impl GenerativeStage {
    pub fn new(model: Arc<dyn GenerativeModel>, memory: ContextMemory) -> Self {
        Self {
            model,
            memory,
            metadata_prompt: DEFAULT_METADATA_PROMPT.to_string(),
            correction_prompt: DEFAULT_CORRECTION_PROMPT.to_string(),
        }
    }

    pub fn with_metadata_prompt(mut self, template: impl Into<String>) -> Self {
        self.metadata_prompt = template.into();
        self
    }

    /// Ollama-backed stage; `LLM_PROMPT_FILE` replaces the metadata prompt.
    pub async fn from_config(config: &Config, memory: ContextMemory) -> anyhow::Result<Self> {
        let client = OllamaClient::from_config(config)?;
        let mut stage = Self::new(Arc::new(client), memory);
        if let Some(path) = &config.llm_prompt_file {
            let template = tokio::fs::read_to_string(path).await?;
            info!("Using metadata prompt from {}", path.display());
            stage = stage.with_metadata_prompt(template);
        }
        Ok(stage)
    }

    pub async fn is_available(&self) -> bool {
        self.model.is_available().await
    }

    pub async fn build_prompt(&self, text: &str) -> String {
        let similar = self.memory.find_similar_documents(text, SIMILAR_CANDIDATES).await;

        let mut examples = String::new();
        if !similar.is_empty() {
            examples.push_str("\n\nFor context, this is how similar documents were analysed before:");
        }
        for (i, entry) in similar.iter().take(MAX_EXAMPLES).enumerate() {
            let metadata = &entry.document.metadata;
            let value = |field: MetadataField| {
                metadata
                    .get(&field)
                    .filter(|v| !v.is_empty())
                    .map(String::as_str)
                    .unwrap_or("not specified")
            };
            examples.push_str(&format!(
                "\n\nExample {} (similarity: {:.2}):\nText fragment: {}...\nResult:",
                i + 1,
                entry.similarity,
                truncate_chars(&entry.document.text_fragment, EXAMPLE_FRAGMENT_CHARS)
            ));
            for field in GENERATED_FIELDS {
                examples.push_str(&format!("\n- {}: {}", field, value(field)));
            }
        }

        self.metadata_prompt
            .replace("{similar_examples}", &examples)
            .replace("{document_text}", truncate_chars(text, PROMPT_TEXT_CHARS))
    }

    /// Asks the model for metadata. Any failure is logged and yields `None`.
    pub async fn extract_metadata(&self, text: &str, filename: &str) -> Option<FieldMap> {
        let prompt = self.build_prompt(text).await;
        let fields = match self.run(&prompt).await {
            Ok(fields) => fields,
            Err(e) => {
                error!("Generative extraction failed for {}: {}", filename, e);
                return None;
            }
        };

        if let Err(e) = self.memory.add_document(text, &fields).await {
            warn!("Could not store {} in context memory: {}", filename, e);
        }
        info!("Generative metadata quality for {}: {:.2}", filename, quality_score(&fields));
        Some(fields)
    }

    /// Lets the model review `record`. Returns the corrected field values, or
    /// `None` when the model could not be used. Changes are recorded as
    /// corrections in context memory.
    pub async fn suggest_corrections(&self, text: &str, record: &MetadataRecord) -> Option<FieldMap> {
        let mut prompt = self
            .correction_prompt
            .replace("{document_text}", truncate_chars(text, CORRECTION_TEXT_CHARS));
        for field in GENERATED_FIELDS {
            prompt = prompt.replace(&format!("{{{}}}", field), record.get(field));
        }

        let suggestions = match self.run(&prompt).await {
            Ok(fields) => fields,
            Err(e) => {
                error!("Generative correction failed: {}", e);
                return None;
            }
        };

        let original = record.fields();
        let mut corrected = original.clone();
        corrected.extend(suggestions);

        match self.memory.add_correction(&original, &corrected, text).await {
            Ok(true) => info!("Applied corrections suggested by the model"),
            Ok(false) => debug!("Model confirmed the extracted metadata"),
            Err(e) => warn!("Could not store correction in context memory: {}", e),
        }
        Some(corrected)
    }

    async fn run(&self, prompt: &str) -> Result<FieldMap, GenerativeError> {
        let raw = self.model.generate(prompt).await?;
        debug!("Model replied: {}", truncate_chars(raw.trim(), 100));
        parse_response(&raw)
    }
}

/// Extracts and validates the JSON object in a model reply. Returns only the
/// non-empty fields.
pub fn parse_response(raw: &str) -> Result<FieldMap, GenerativeError> {
    let reply = raw.rsplit(ASSISTANT_MARKER).next().unwrap_or(raw).trim();
    let candidate = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if end > start => &reply[start..=end],
        _ => reply,
    };

    let value: Value = serde_json::from_str(&strip_invalid_escapes(candidate))
        .map_err(|e| GenerativeError::Parse(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(GenerativeError::Parse("reply is not a JSON object".to_string()));
    };

    let mut fields = FieldMap::new();
    for (key, field) in RESPONSE_KEYS {
        let Some(value) = object.get(*key) else {
            continue;
        };
        let Value::String(value) = value else {
            return Err(GenerativeError::Validation(format!("field {} is not a string", key)));
        };
        let value = value.trim();
        if *field == MetadataField::Date && !value.is_empty() && !ISO_DATE.is_match(value) {
            return Err(GenerativeError::Validation(format!("invalid date format: {}", value)));
        }
        if !value.is_empty() && !fields.contains_key(field) {
            fields.insert(*field, value.to_string());
        }
    }
    Ok(fields)
}

/// Drops backslashes that do not start a valid JSON escape.
fn strip_invalid_escapes(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '\\' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        match chars.get(i + 1) {
            Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't') => {
                out.push('\\');
                out.push(chars[i + 1]);
                i += 2;
            }
            Some('u') if chars.len() > i + 5 && chars[i + 2..i + 6].iter().all(char::is_ascii_hexdigit) => {
                out.push('\\');
                i += 1;
            }
            _ => i += 1,
        }
    }
    out
}

/// Share of the five generated fields that carry a value.
pub fn quality_score(fields: &FieldMap) -> f32 {
    let filled = GENERATED_FIELDS
        .iter()
        .filter(|field| fields.get(*field).is_some_and(|v| !v.is_empty()))
        .count();
    filled as f32 / GENERATED_FIELDS.len() as f32
}
