//! crates/production_core/src/classify.rs
//!
//! Prompt categorisation. Keyword rules take precedence over the model, and
//! any classifier failure falls back to a fixed category.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::ports::TextClassifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Action,
    Commedia,
    Dramma,
    Coppia,
}

impl Category {
    pub const FALLBACK: Category = Category::Commedia;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Commedia => "commedia",
            Self::Dramma => "dramma",
            Self::Coppia => "coppia",
        }
    }

    /// Parses a raw model label. Only the three single-mode categories are
    /// accepted from the model.
    pub fn from_label(label: &str) -> Option<Self> {
        static NON_ALPHA: OnceLock<Regex> = OnceLock::new();
        let re = NON_ALPHA.get_or_init(|| Regex::new("[^a-z]").expect("valid regex"));
        match re.replace_all(&label.trim().to_lowercase(), "").as_ref() {
            "action" => Some(Self::Action),
            "commedia" => Some(Self::Commedia),
            "dramma" => Some(Self::Dramma),
            _ => None,
        }
    }
}

const ACTION_KEYWORDS: &[&str] = &[
    "rincorre",
    "scappa",
    "polizia",
    "carabinieri",
    "rubato",
    "moto",
    "macchina",
    "velocità",
    "fuga",
    "inseguimento",
];

const DRAMA_KEYWORDS: &[&str] = &[
    "ghostato", "lasciato", "pianto", "triste", "solo", "addio", "cuore", "tradito", "soffro",
];

/// Category forced by keyword rules, if any.
pub fn keyword_category(text: &str) -> Option<Category> {
    let lower = text.to_lowercase();
    if ACTION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Some(Category::Action)
    } else if DRAMA_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Some(Category::Dramma)
    } else {
        None
    }
}

/// Picks a category for a prompt. Never fails.
pub async fn classify_prompt(
    classifier: Option<&dyn TextClassifier>,
    text: &str,
    couple_mode: bool,
) -> Category {
    if text.trim().is_empty() {
        return Category::FALLBACK;
    }
    if couple_mode {
        return Category::Coppia;
    }
    if let Some(forced) = keyword_category(text) {
        info!(category = forced.as_str(), "Category forced by keyword rule");
        return forced;
    }
    let Some(classifier) = classifier else {
        return Category::FALLBACK;
    };
    match classifier.classify(text).await {
        Ok(label) => Category::from_label(&label).unwrap_or(Category::FALLBACK),
        Err(e) => {
            error!("Classifier failed, using fallback category: {:?}", e);
            Category::FALLBACK
        }
    }
}
