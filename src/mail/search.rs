//! IMAP SEARCH query model
//!
//! Queries are immutable trees of search keys combined with AND / NOT and
//! rendered to the RFC 3501 search grammar.

use chrono::NaiveDate;
use std::fmt;

/// A single search key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    /// Internal date on or after the given day
    Since(NaiveDate),
    From(String),
    Subject(String),
    Body(String),
    Unseen,
    Unflagged,
    /// Keyword flag is not set
    Unkeyword(String),
    /// Gmail label (X-GM-LABELS extension)
    GmailLabel(String),
}

/// Search query tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    Key(SearchKey),
    Not(Box<SearchQuery>),
    And(Vec<SearchQuery>),
}

impl SearchQuery {
    pub fn and(queries: Vec<SearchQuery>) -> Self {
        SearchQuery::And(queries)
    }

    pub fn not(query: SearchQuery) -> Self {
        SearchQuery::Not(Box::new(query))
    }

    /// Render for `UID SEARCH`. The outermost AND is written without
    /// parentheses; an empty query matches everything.
    pub fn to_imap(&self) -> String {
        match self {
            SearchQuery::And(items) if items.is_empty() => "ALL".to_string(),
            SearchQuery::And(items) => items
                .iter()
                .map(|q| q.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            other => other.to_string(),
        }
    }
}

impl From<SearchKey> for SearchQuery {
    fn from(key: SearchKey) -> Self {
        SearchQuery::Key(key)
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchQuery::Key(key) => write!(f, "{}", key),
            SearchQuery::Not(inner) => write!(f, "NOT {}", inner),
            SearchQuery::And(items) if items.is_empty() => f.write_str("ALL"),
            SearchQuery::And(items) => {
                let parts: Vec<String> = items.iter().map(|q| q.to_string()).collect();
                write!(f, "({})", parts.join(" "))
            }
        }
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchKey::Since(date) => write!(f, "SINCE {}", date.format("%d-%b-%Y")),
            SearchKey::From(value) => write!(f, "FROM {}", quote(value)),
            SearchKey::Subject(value) => write!(f, "SUBJECT {}", quote(value)),
            SearchKey::Body(value) => write!(f, "BODY {}", quote(value)),
            SearchKey::Unseen => f.write_str("UNSEEN"),
            SearchKey::Unflagged => f.write_str("UNFLAGGED"),
            SearchKey::Unkeyword(keyword) => write!(f, "UNKEYWORD {}", atom(keyword)),
            SearchKey::GmailLabel(label) => write!(f, "X-GM-LABELS {}", quote(label)),
        }
    }
}

/// IMAP quoted string. CR/LF cannot be carried in a quoted string and are dropped.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\r' | '\n' => {}
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Keywords are atoms; strip atom-specials rather than quoting.
///
/// Both UNKEYWORD and STORE go through this, so a search for a keyword
/// matches the flag that was written.
pub fn atom(value: &str) -> String {
    value
        .chars()
        .filter(|c| {
            !c.is_control()
                && !c.is_whitespace()
                && !matches!(c, '(' | ')' | '{' | '%' | '*' | '"' | '\\' | ']')
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_is_all() {
        assert_eq!(SearchQuery::and(vec![]).to_imap(), "ALL");
    }

    #[test]
    fn test_since_format() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(SearchKey::Since(date).to_string(), "SINCE 05-Mar-2024");
    }

    #[test]
    fn test_quoting_escapes_specials() {
        assert_eq!(quote(r#"say "hi" \o/"#), r#""say \"hi\" \\o/""#);
        assert_eq!(quote("a\r\nb"), "\"ab\"");
    }

    #[test]
    fn test_nested_not_and_rendering() {
        let query = SearchQuery::and(vec![
            SearchQuery::not(SearchKey::GmailLabel("Invoices".into()).into()),
            SearchKey::Unkeyword("Invoices".into()).into(),
            SearchKey::From("acme".into()).into(),
        ]);
        assert_eq!(
            query.to_imap(),
            r#"NOT X-GM-LABELS "Invoices" UNKEYWORD Invoices FROM "acme""#
        );
        assert_eq!(
            query.to_string(),
            r#"(NOT X-GM-LABELS "Invoices" UNKEYWORD Invoices FROM "acme")"#
        );
    }
}
