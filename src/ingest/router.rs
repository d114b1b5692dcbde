//! Document router
//!
//! Classifies a document's header sample into a content class that selects
//! the splitter configuration. Classification degrades gracefully: caller
//! hint first, then one LLM call, then regex heuristics, and `Generic` when
//! nothing matches. The router never fails.

use crate::llm::LlmContext;
use crate::text::fold_for_comparison;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Content classes recognised by the splitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    Legal,
    Wiki,
    Article,
    Manual,
    Book,
    Contract,
    Generic,
}

impl ContentClass {
    pub fn label(&self) -> &'static str {
        match self {
            ContentClass::Legal => "legal",
            ContentClass::Wiki => "wiki",
            ContentClass::Article => "article",
            ContentClass::Manual => "manual",
            ContentClass::Book => "book",
            ContentClass::Contract => "contract",
            ContentClass::Generic => "generic",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match fold_for_comparison(label.trim()).as_str() {
            "legal" => Some(Self::Legal),
            "wiki" => Some(Self::Wiki),
            "article" => Some(Self::Article),
            "manual" => Some(Self::Manual),
            "book" => Some(Self::Book),
            "contract" => Some(Self::Contract),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    pub fn all_labels() -> Vec<&'static str> {
        vec![
            "legal", "wiki", "article", "manual", "book", "contract", "generic",
        ]
    }
}

/// Caller-provided routing hint
#[derive(Debug, Clone)]
pub enum RouteHint {
    /// The caller already knows the class
    Class(ContentClass),
    /// Source URL; the host may identify the class
    Url(String),
    /// Original file extension before conversion
    FileExtension(String),
}

lazy_static! {
    static ref LEGAL_PATTERN: Regex =
        Regex::new(r"(?mi)^\s*(t[íi]tulo|cap[íi]tulo|se[çc][ãa]o|art(igo)?\.?\s*\d)")
            .expect("static regex");
    static ref CONTRACT_PATTERN: Regex =
        Regex::new(r"(?i)(cl[áa]usula|contrato\b|entre as partes|whereas\b|hereinafter)")
            .expect("static regex");
    static ref WIKI_PATTERN: Regex =
        Regex::new(r"(?m)(^==[^=\n]+==\s*$|\{\{Infobox)").expect("static regex");
    static ref MANUAL_PATTERN: Regex =
        Regex::new(r"(?i)(user guide|manual (de|do|of)|installation|troubleshooting)")
            .expect("static regex");
    static ref BOOK_PATTERN: Regex =
        Regex::new(r"(?mi)^(chapter|cap[íi]tulo)\s+(\d+|[ivxlc]+)\b").expect("static regex");
    static ref ARTICLE_PATTERN: Regex =
        Regex::new(r"(?mi)^\s*(abstract|resumo)\s*$").expect("static regex");
}

/// Stateless content-class router
#[derive(Debug, Clone, Default)]
pub struct DocumentRouter;

impl DocumentRouter {
    pub fn new() -> Self {
        Self
    }

    /// Classify a header sample (the first 500 chars of the document).
    ///
    /// `llm` is consulted only when the hint does not settle the class.
    pub async fn classify(
        &self,
        header_sample: &str,
        hint: Option<&RouteHint>,
        llm: Option<&LlmContext>,
    ) -> ContentClass {
        if let Some(class) = hint.and_then(classify_by_hint) {
            debug!("Router: hint resolved class {}", class.label());
            return class;
        }

        if let Some(llm) = llm {
            match llm.classify(header_sample, &ContentClass::all_labels()).await {
                Ok(label) => {
                    if let Some(class) = ContentClass::from_label(&label) {
                        debug!("Router: LLM resolved class {}", class.label());
                        return class;
                    }
                    warn!("Router: LLM returned unknown label {:?}", label);
                }
                Err(e) => warn!("Router: LLM classification failed: {}", e),
            }
        }

        let class = classify_by_heuristics(header_sample);
        debug!("Router: heuristics resolved class {}", class.label());
        class
    }
}

fn classify_by_hint(hint: &RouteHint) -> Option<ContentClass> {
    match hint {
        RouteHint::Class(class) => Some(*class),
        RouteHint::Url(url) => {
            let lower = url.to_lowercase();
            if lower.contains("wikipedia.") || lower.contains("wiki/") {
                Some(ContentClass::Wiki)
            } else if lower.contains("planalto.gov") || lower.contains(".leg.") || lower.contains("lexml") {
                Some(ContentClass::Legal)
            } else {
                None
            }
        }
        RouteHint::FileExtension(extension) => {
            match extension.trim_start_matches('.').to_lowercase().as_str() {
                "wiki" | "mediawiki" => Some(ContentClass::Wiki),
                _ => None,
            }
        }
    }
}

fn classify_by_heuristics(header: &str) -> ContentClass {
    if LEGAL_PATTERN.is_match(header) {
        ContentClass::Legal
    } else if CONTRACT_PATTERN.is_match(header) {
        ContentClass::Contract
    } else if WIKI_PATTERN.is_match(header) {
        ContentClass::Wiki
    } else if BOOK_PATTERN.is_match(header) {
        ContentClass::Book
    } else if MANUAL_PATTERN.is_match(header) {
        ContentClass::Manual
    } else if ARTICLE_PATTERN.is_match(header) {
        ContentClass::Article
    } else {
        ContentClass::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hint_has_priority() {
        let router = DocumentRouter::new();
        let hint = RouteHint::Class(ContentClass::Book);

        // Header looks legal, but the explicit hint wins
        let class = router
            .classify("Art. 1 Esta lei dispõe sobre...", Some(&hint), None)
            .await;
        assert_eq!(class, ContentClass::Book);
    }

    #[tokio::test]
    async fn test_url_hints() {
        let router = DocumentRouter::new();

        let wiki = RouteHint::Url("https://pt.wikipedia.org/wiki/Borges".to_string());
        assert_eq!(
            router.classify("anything", Some(&wiki), None).await,
            ContentClass::Wiki
        );

        let legal = RouteHint::Url("https://www.planalto.gov.br/ccivil_03/leis".to_string());
        assert_eq!(
            router.classify("anything", Some(&legal), None).await,
            ContentClass::Legal
        );
    }

    #[tokio::test]
    async fn test_heuristics() {
        let router = DocumentRouter::new();

        assert_eq!(
            router
                .classify("TÍTULO I\nCapítulo II\nArt. 5 ...", None, None)
                .await,
            ContentClass::Legal
        );
        assert_eq!(
            router
                .classify("== História ==\nO município foi fundado...", None, None)
                .await,
            ContentClass::Wiki
        );
    }

    #[tokio::test]
    async fn test_contract_and_book_heuristics() {
        let router = DocumentRouter::new();

        assert_eq!(
            router
                .classify("Cláusula primeira: do objeto do contrato", None, None)
                .await,
            ContentClass::Contract
        );
        assert_eq!(
            router
                .classify("Chapter 1\nIt was the best of times", None, None)
                .await,
            ContentClass::Book
        );
    }

    #[tokio::test]
    async fn test_never_fails_falls_back_to_generic() {
        let router = DocumentRouter::new();
        assert_eq!(
            router.classify("plain unstructured prose", None, None).await,
            ContentClass::Generic
        );
        assert_eq!(router.classify("", None, None).await, ContentClass::Generic);
    }

    #[test]
    fn test_label_round_trip() {
        for label in ContentClass::all_labels() {
            let class = ContentClass::from_label(label).unwrap();
            assert_eq!(class.label(), label);
        }
        assert_eq!(ContentClass::from_label("LEGAL"), Some(ContentClass::Legal));
        assert_eq!(ContentClass::from_label("unknown"), None);
    }
}
