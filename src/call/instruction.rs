//! System instruction for the live model: language, service scope and
//! knowledge base.

use crate::error::{PraniError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Service line the caller picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    Farming,
    AnimalHealth,
    GovernmentSchemes,
    #[default]
    GeneralQueries,
}

impl Service {
    pub const ALL: [Service; 4] = [
        Service::Farming,
        Service::AnimalHealth,
        Service::GovernmentSchemes,
        Service::GeneralQueries,
    ];

    /// Name shown to the caller and used inside the instruction.
    pub fn display_name(&self) -> &'static str {
        match self {
            Service::Farming => "Farming",
            Service::AnimalHealth => "Animal Health",
            Service::GovernmentSchemes => "Government Schemes",
            Service::GeneralQueries => "General Queries",
        }
    }

    /// Identifier accepted on the command line and in config files.
    pub fn key(&self) -> &'static str {
        match self {
            Service::Farming => "farming",
            Service::AnimalHealth => "animal-health",
            Service::GovernmentSchemes => "government-schemes",
            Service::GeneralQueries => "general-queries",
        }
    }

    fn scope_instruction(&self) -> &'static str {
        match self {
            Service::Farming => {
                "The user has explicitly selected 'Farming' services. You must STRICTLY LIMIT \
                 your responses to questions about crops, soil, plants, irrigation, fertilizers, \
                 weather impact on crops, and pest management for crops. You must answer these \
                 questions based primarily on the provided Knowledge Base. DO NOT answer questions \
                 about animals, livestock, or veterinary advice. If the user asks about animals, \
                 politely inform them in the selected language that you can only answer \
                 farming-related questions in this mode."
            }
            Service::AnimalHealth => {
                "The user has explicitly selected 'Animal Health' services. You must STRICTLY \
                 LIMIT your responses to questions about livestock, cattle, poultry, sheep, goats, \
                 pigs, animal diseases, animal nutrition, and veterinary advice. You must answer \
                 these questions based primarily on the provided Knowledge Base. DO NOT answer \
                 questions about growing crops, soil, or plant farming. If the user asks about \
                 crops, politely inform them in the selected language that you can only answer \
                 animal health questions in this mode."
            }
            Service::GovernmentSchemes => {
                "The user has selected 'Government Schemes'. Focus primarily on explaining \
                 government schemes available for farmers. You may use external general knowledge \
                 for major Indian schemes if not found in the knowledge base. Do not answer \
                 detailed technical farming or veterinary questions unless they relate to a scheme."
            }
            Service::GeneralQueries => {
                "The user has selected 'General Queries'. You may answer questions regarding both \
                 Farming and Animal Health based on the provided Knowledge Base."
            }
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Service {
    type Err = PraniError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "farming" => Ok(Service::Farming),
            "animal-health" | "animals" => Ok(Service::AnimalHealth),
            "government-schemes" | "schemes" => Ok(Service::GovernmentSchemes),
            "general-queries" | "general" => Ok(Service::GeneralQueries),
            _ => Err(PraniError::ConfigInvalidValue {
                key: "session.service".to_string(),
                message: format!(
                    "unknown service '{}', expected one of: farming, animal-health, \
                     government-schemes, general-queries",
                    s
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub question: String,
    pub answer: String,
}

/// Question/answer pairs the assistant should prefer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub entries: Vec<KnowledgeEntry>,
}

impl KnowledgeBase {
    /// Load `[[entries]]` tables from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PraniError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                PraniError::Io(e)
            }
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PraniError::ConfigParse {
            message: format!("knowledge base: {}", e),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `Q: ..` / `A: ..` blocks separated by blank lines.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|qa| format!("Q: {}\nA: {}", qa.question, qa.answer))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Build the language-scoped system instruction.
pub fn build_system_instruction(
    language: &str,
    service: Service,
    knowledge_base: &KnowledgeBase,
    closing_message: &str,
) -> String {
    format!(
        "You are Prani Mitra, a helpful AI assistant for Indian farmers. Your expertise is \
         strictly limited to the selected service: {service}. You must answer ONLY in {language}. \
         {scope}\n\n\
         Use the following Knowledge Base. If the answer is not in the Knowledge Base, you may \
         use general agricultural knowledge suitable for India, but ONLY if it falls within the \
         strict scope of {service}. If the user ends the conversation, say \"{closing}\" and \
         nothing else.\n\n\
         ---START OF KNOWLEDGE BASE---\n{knowledge}\n---END OF KNOWLEDGE BASE---",
        service = service.display_name(),
        language = language,
        scope = service.scope_instruction(),
        closing = closing_message,
        knowledge = knowledge_base.render(),
    )
}

/// First line the assistant is expected to open with.
pub fn greeting(service: Service) -> String {
    format!(
        "Hello! I am your Prani Mitra Assistant for {}. How can I help you today?",
        service.display_name()
    )
}
