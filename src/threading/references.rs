//! Reference header parsing
//!
//! Turns raw `References` / `In-Reply-To` header values into an ordered list of
//! message ids, oldest first. Parsing never fails: tokens that are not message
//! ids are dropped and an empty or garbage header yields an empty list.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Lazy-initialized regex for tokenizing reference headers
static REFERENCE_TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();

/// Matches either an angle-bracketed id (`<local@domain>`, group 1) or any other
/// run of non-whitespace (group 2).
fn reference_token_regex() -> &'static Regex {
    REFERENCE_TOKEN_REGEX.get_or_init(|| {
        Regex::new(r"<([^<>\s]*)>|(\S+)").expect("Invalid reference token regex")
    })
}

/// Remove NUL bytes and surrounding whitespace
pub(crate) fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

/// Clean a single message id by removing angle brackets and whitespace.
///
/// Returns `None` for empty ids.
pub fn normalize_message_id(raw: &str) -> Option<String> {
    let cleaned = raw.trim().trim_matches(&['<', '>'][..]).trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(sanitize_text(cleaned))
    }
}

/// Validate a bare token (one written without angle brackets).
///
/// Some clients drop the brackets; anything that still looks like `local@domain`
/// is kept. Stray brackets or tokens without `@` are treated as malformed.
fn bare_token_to_id(token: &str) -> Option<String> {
    if token.contains('<') || token.contains('>') {
        return None;
    }
    let token = token.trim_matches(|c: char| c == ',' || c == ';');
    let (local, domain) = token.split_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    normalize_message_id(token)
}

/// Parse a raw reference header into an ordered, deduplicated list of ids.
///
/// The first occurrence of a repeated id wins so the declared order of the
/// oldest ancestors is preserved.
///
/// ## Examples
///
/// ```rust
/// use threadline::threading::references::parse_references;
///
/// assert_eq!(
///     parse_references("<a@x> <b@x>\r\n <a@x>"),
///     vec!["a@x".to_string(), "b@x".to_string()]
/// );
/// assert!(parse_references("").is_empty());
/// ```
pub fn parse_references(header_value: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for captures in reference_token_regex().captures_iter(header_value) {
        let parsed = match (captures.get(1), captures.get(2)) {
            (Some(bracketed), _) => normalize_message_id(bracketed.as_str()),
            (None, Some(bare)) => bare_token_to_id(bare.as_str()),
            (None, None) => None,
        };

        match parsed {
            Some(id) => {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            None => {
                if let Some(token) = captures.get(0) {
                    log::trace!("dropping malformed reference token `{}`", token.as_str());
                }
            }
        }
    }

    ids
}

/// Combine `References` and `In-Reply-To` into one reference chain.
///
/// `References` is authoritative. The first id of `In-Reply-To` is appended when
/// it is missing from the chain, which covers clients that only send
/// `In-Reply-To`. An id that already appears earlier in the chain is left where
/// it is.
pub fn parse_reference_headers(references: Option<&str>, in_reply_to: Option<&str>) -> Vec<String> {
    let mut ids = references.map(parse_references).unwrap_or_default();

    if let Some(parent) = in_reply_to
        .map(parse_references)
        .and_then(|parsed| parsed.into_iter().next())
    {
        if !ids.contains(&parent) {
            ids.push(parent);
        }
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_message_id() {
        assert_eq!(
            normalize_message_id("<test@example.com>"),
            Some("test@example.com".to_string())
        );
        assert_eq!(normalize_message_id("  "), None);
        assert_eq!(normalize_message_id("<>"), None);
    }

    #[test]
    fn test_sanitize_text_strips_nul_and_whitespace() {
        assert_eq!(sanitize_text("  Re:\0 plans \n"), "Re: plans");
        assert_eq!(sanitize_text("\0"), "");
    }

    #[test]
    fn test_extract_references() {
        let refs = parse_references("<msg1@example.com> <msg2@example.com>");
        assert_eq!(refs, vec!["msg1@example.com", "msg2@example.com"]);
    }

    #[test]
    fn test_folded_header_and_duplicates() {
        let refs = parse_references("<a@x>\r\n\t<b@x>\r\n <a@x> <c@x>");
        assert_eq!(refs, vec!["a@x", "b@x", "c@x"]);
    }

    #[test]
    fn test_malformed_tokens_dropped() {
        let refs = parse_references("garbage <a@x> <> <b@x <c@x> also-bad");
        assert_eq!(refs, vec!["a@x", "c@x"]);
    }

    #[test]
    fn test_bare_ids_accepted() {
        let refs = parse_references("a@x, <b@x>");
        assert_eq!(refs, vec!["a@x", "b@x"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_references("").is_empty());
        assert!(parse_references("   \r\n ").is_empty());
    }

    #[test]
    fn test_in_reply_to_fallback() {
        assert_eq!(parse_reference_headers(None, Some("<p@x>")), vec!["p@x"]);
        assert_eq!(
            parse_reference_headers(Some("<a@x> <b@x>"), Some("<b@x>")),
            vec!["a@x", "b@x"]
        );
        assert_eq!(
            parse_reference_headers(Some("<a@x>"), Some("<b@x> (comment)")),
            vec!["a@x", "b@x"]
        );
        assert!(parse_reference_headers(None, None).is_empty());
    }
}
