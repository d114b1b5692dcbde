//! Websearch query normalization
//!
//! The user string is parsed into implicit-OR terms, quoted phrases and
//! `-`-excluded terms, folded for accent-insensitive matching, and rendered
//! back into the expression handed to `websearch_to_tsquery`. Parsing the
//! rendered form yields the same structure, so normalization is idempotent.

use crate::error::{RagError, Result};
use crate::text::fold_for_comparison;

/// Boolean operators are rejected; quoting and `-` express the same intent
const FORBIDDEN_OPERATORS: &[&str] = &["AND", "OR", "NOT"];

/// Normalized websearch query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebQuery {
    /// Bare terms, combined with implicit OR
    pub terms: Vec<String>,
    /// Quoted phrases matched adjacently
    pub phrases: Vec<String>,
    /// Terms excluded with a leading `-`
    pub excluded: Vec<String>,
}

impl WebQuery {
    /// Render the expression passed to `websearch_to_tsquery`
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        for phrase in &self.phrases {
            parts.push(format!("\"{}\"", phrase));
        }
        parts.extend(self.terms.iter().cloned());
        for excluded in &self.excluded {
            parts.push(format!("-{}", excluded));
        }
        parts.join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.phrases.is_empty()
    }
}

/// Parse and normalize a user query string
pub fn parse(query: &str) -> Result<WebQuery> {
    if query.trim().is_empty() {
        return Err(RagError::InvalidInput("empty query".to_string()));
    }

    let mut terms = Vec::new();
    let mut phrases = Vec::new();
    let mut excluded = Vec::new();

    for token in tokenize(query) {
        match token {
            Token::Word(word) => {
                if FORBIDDEN_OPERATORS.contains(&word.as_str()) {
                    return Err(RagError::InvalidInput(format!(
                        "boolean operator {:?} is not supported; \
                         use \"...\" for phrases and a leading - for exclusion",
                        word
                    )));
                }
                let folded = fold_token(&word);
                if !folded.is_empty() {
                    terms.push(folded);
                }
            }
            Token::Phrase(phrase) => {
                let folded = fold_phrase(&phrase);
                if !folded.is_empty() {
                    phrases.push(folded);
                }
            }
            Token::Excluded(word) => {
                let folded = fold_token(&word);
                if !folded.is_empty() {
                    excluded.push(folded);
                }
            }
        }
    }

    let parsed = WebQuery {
        terms,
        phrases,
        excluded,
    };
    if parsed.is_empty() {
        return Err(RagError::InvalidInput(
            "query has no searchable terms".to_string(),
        ));
    }
    Ok(parsed)
}

enum Token {
    Word(String),
    Phrase(String),
    Excluded(String),
}

fn tokenize(query: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '"' {
            chars.next();
            let mut phrase = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                phrase.push(c);
            }
            if !phrase.trim().is_empty() {
                tokens.push(Token::Phrase(phrase.trim().to_string()));
            }
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '"' {
                break;
            }
            word.push(c);
            chars.next();
        }

        if let Some(stripped) = word.strip_prefix('-') {
            if !stripped.is_empty() {
                tokens.push(Token::Excluded(stripped.to_string()));
            }
        } else if !word.is_empty() {
            tokens.push(Token::Word(word));
        }
    }

    tokens
}

/// Fold one term: lowercase, accents stripped, tsquery syntax removed
fn fold_token(word: &str) -> String {
    fold_for_comparison(word)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Fold a phrase keeping single-space word separation
fn fold_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(fold_token)
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_terms_are_implicit_or() {
        let parsed = parse("café leite").unwrap();
        assert_eq!(parsed.terms, vec!["cafe", "leite"]);
        assert!(parsed.phrases.is_empty());
        assert!(parsed.excluded.is_empty());
    }

    #[test]
    fn test_accent_folding() {
        // café and cafe normalize to the same internal form
        assert_eq!(parse("café").unwrap(), parse("cafe").unwrap());
        assert_eq!(parse("AÇÚCAR").unwrap(), parse("acucar").unwrap());
    }

    #[test]
    fn test_phrases() {
        let parsed = parse("\"pão quente\" padaria").unwrap();
        assert_eq!(parsed.phrases, vec!["pao quente"]);
        assert_eq!(parsed.terms, vec!["padaria"]);
        assert_eq!(parsed.render(), "\"pao quente\" padaria");
    }

    #[test]
    fn test_exclusion() {
        let parsed = parse("café -açúcar").unwrap();
        assert_eq!(parsed.terms, vec!["cafe"]);
        assert_eq!(parsed.excluded, vec!["acucar"]);
        assert_eq!(parsed.render(), "cafe -acucar");
    }

    #[test]
    fn test_boolean_operators_rejected() {
        for query in ["café AND leite", "a OR b", "x NOT y"] {
            let result = parse(query);
            assert!(matches!(result, Err(RagError::InvalidInput(_))), "{}", query);
        }
        // Lowercase forms are ordinary words, not operators
        assert!(parse("bread and butter").is_ok());
    }

    #[test]
    fn test_empty_queries_rejected() {
        assert!(matches!(parse(""), Err(RagError::InvalidInput(_))));
        assert!(matches!(parse("   "), Err(RagError::InvalidInput(_))));
        // Only punctuation folds away to nothing
        assert!(matches!(parse("!!! ???"), Err(RagError::InvalidInput(_))));
    }

    #[test]
    fn test_parse_is_idempotent() {
        for query in [
            "café -açúcar",
            "\"pão quente\" padaria",
            "direito  civil   \"código penal\" -revogado",
        ] {
            let once = parse(query).unwrap();
            let twice = parse(&once.render()).unwrap();
            assert_eq!(once, twice, "{}", query);
        }
    }

    #[test]
    fn test_tsquery_syntax_is_stripped() {
        let parsed = parse("a&b | c:* (d)").unwrap();
        for term in &parsed.terms {
            assert!(term.chars().all(char::is_alphanumeric));
        }
    }

    #[test]
    fn test_unclosed_quote() {
        let parsed = parse("\"pão quente").unwrap();
        assert_eq!(parsed.phrases, vec!["pao quente"]);
    }
}
