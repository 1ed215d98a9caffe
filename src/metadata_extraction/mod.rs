//! Metadata extraction chain.
//!
//! Stages run in a fixed order and each one only fills fields that are still
//! empty, so the earliest stage to produce a value owns it:
//!
//! 1. entity extractor (optional capability)
//! 2. rule tables ([`rules`])
//! 3. inline safety net ([`safety_net`])
//! 4. generative stage (optional, [`generative`])
//! 5. correction history from [`ContextMemory`]

pub mod entities;
pub mod generative;
pub mod rules;
pub mod safety_net;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context_memory::ContextMemory;
use crate::models::{MetadataField, MetadataRecord};

pub use entities::{entities_to_fields, EntityExtractor, EntityLabel, PatternEntityModel};
pub use generative::{GenerativeError, GenerativeModel, GenerativeStage, OllamaClient};
pub use rules::RuleBasedExtractor;

/// Subject placeholder written when no entity extractor is available.
pub const ENTITY_MODEL_MISSING: &str = "ERROR: entity model is not loaded";

#[derive(Clone)]
pub struct MetadataExtractor {
    entities: Option<Arc<dyn EntityExtractor>>,
    rules: RuleBasedExtractor,
    memory: ContextMemory,
}

impl MetadataExtractor {
    pub fn new(entities: Option<Arc<dyn EntityExtractor>>, memory: ContextMemory) -> Self {
        Self {
            entities,
            rules: RuleBasedExtractor::new(),
            memory,
        }
    }

    /// Loads the entity model named by `ENTITY_MODEL_PATH`, if any. A model
    /// that fails to load leaves the chain without the capability.
    pub fn from_config(config: &Config, memory: ContextMemory) -> Self {
        let entities = config.entity_model_path.as_ref().and_then(|path| {
            match PatternEntityModel::load(path) {
                Ok(model) => Some(Arc::new(model) as Arc<dyn EntityExtractor>),
                Err(e) => {
                    warn!("Entity model unavailable: {}", e);
                    None
                }
            }
        });
        Self::new(entities, memory)
    }

    pub fn has_entity_extractor(&self) -> bool {
        self.entities.is_some()
    }

    pub fn memory(&self) -> &ContextMemory {
        &self.memory
    }

    pub async fn extract_info(
        &self,
        text: &str,
        filename: &str,
        mode: &str,
        case_signature_override: &str,
        generative: Option<&GenerativeStage>,
    ) -> MetadataRecord {
        debug!("Extracting metadata for {} (mode {})", filename, mode);
        let mut record = MetadataRecord::new();
        record.fill(MetadataField::CaseSignature, case_signature_override);

        let mut degraded = false;
        match &self.entities {
            Some(extractor) => {
                let found = record.fill_from(&entities_to_fields(&extractor.extract_entities(text)));
                debug!("Entity stage filled {} fields", found);
            }
            None => {
                warn!("No entity extractor loaded, continuing with rules only");
                record.fill(MetadataField::Subject, ENTITY_MODEL_MISSING);
                degraded = true;
            }
        }

        let found = record.fill_from(&self.rules.extract(text));
        debug!("Rule stage filled {} fields", found);

        let net = safety_net::safety_net(&record, text);
        let found = record.fill_from(&net);
        debug!("Safety net filled {} fields", found);

        if let Some(stage) = generative {
            info!("Running generative stage for {}", filename);
            if let Some(fields) = stage.extract_metadata(text, filename).await {
                let found = record.fill_from(&fields);
                debug!("Generative stage filled {} fields", found);
            }
        }

        let corrected = self.memory.apply_contextual_corrections(&mut record, text).await;
        if corrected > 0 {
            debug!("Correction history filled {} fields", corrected);
        }

        record.finalize(degraded);
        record
    }
}
