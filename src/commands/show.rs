use clap::Args;
use std::collections::BTreeMap;

use docsync::{AutomergeEngine, DocumentStorage, Registry};

use super::config_cmd::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ShowCommand {
    /// Only show this document
    pub doc_id: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl ShowCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let storage = DocumentStorage::new(config.data_dir.value.clone());
        let documents = render(&storage, self.doc_id.as_deref())?;

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&documents)?);
            }
            OutputFormat::Text => {
                if documents.is_empty() {
                    println!("No documents in {}", storage.data_dir().display());
                    return Ok(());
                }
                for (doc_id, json) in &documents {
                    println!("{}: {}", doc_id, json);
                }
            }
        }

        Ok(())
    }
}

/// Loads stored documents and renders them as JSON, keyed by document id.
fn render(
    storage: &DocumentStorage,
    doc_id: Option<&str>,
) -> Result<BTreeMap<String, serde_json::Value>, Box<dyn std::error::Error>> {
    let mut registry = Registry::new(AutomergeEngine::new());
    storage.load_registry(&mut registry)?;

    if let Some(doc_id) = doc_id {
        if !registry.contains(doc_id) {
            return Err(format!("Document not found: {}", doc_id).into());
        }
    }

    let mut documents = BTreeMap::new();
    for id in registry.document_ids() {
        if doc_id.is_some_and(|wanted| wanted != id) {
            continue;
        }
        if let Some(doc) = registry.get_document(id) {
            documents.insert(id.to_string(), AutomergeEngine::to_json(doc)?);
        }
    }

    Ok(documents)
}
