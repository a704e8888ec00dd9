//! Resource URI patterns with `{name}` placeholders.
//!
//! Only simple string expansion is supported (RFC 6570 level 1). Bound
//! values are inserted verbatim.

use std::collections::HashMap;
use std::fmt;

use crate::error::McpError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

/// A parsed resource URI pattern such as `table://{table_name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl UriPattern {
    pub fn parse(raw: &str) -> Result<Self, McpError> {
        let mut segments = Vec::new();
        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let close = rest[open..]
                .find('}')
                .map(|i| open + i)
                .ok_or_else(|| McpError::InvalidParams(format!("unclosed '{{' in '{raw}'")))?;
            let name = rest[open + 1..close].trim();
            if name.is_empty() || name.contains('{') {
                return Err(McpError::InvalidParams(format!(
                    "bad placeholder in '{raw}'"
                )));
            }
            segments.push(Segment::Var(name.to_string()));
            rest = &rest[close + 1..];
        }
        if rest.contains('}') {
            return Err(McpError::InvalidParams(format!("stray '}}' in '{raw}'")));
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// A pattern with no placeholders.
    pub fn literal(uri: &str) -> Self {
        Self {
            raw: uri.to_string(),
            segments: vec![Segment::Literal(uri.to_string())],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_concrete(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Var(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitute every placeholder. A missing binding is an error; extra
    /// bindings are ignored.
    pub fn expand(&self, bindings: &HashMap<String, String>) -> Result<String, McpError> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(name) => {
                    let value = bindings.get(name).ok_or_else(|| McpError::ResourceNotFound {
                        uri: self.raw.clone(),
                        message: format!("missing binding for '{name}'"),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Match a concrete URI, returning the placeholder bindings. Each
    /// placeholder must capture at least one character.
    pub fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        let mut bindings = HashMap::new();
        let mut rest = uri;
        let mut iter = self.segments.iter().peekable();
        while let Some(segment) = iter.next() {
            match segment {
                Segment::Literal(text) => rest = rest.strip_prefix(text.as_str())?,
                Segment::Var(name) => {
                    let end = match iter.peek() {
                        Some(Segment::Literal(next)) => rest.find(next.as_str())?,
                        // Adjacent placeholders are ambiguous; take one char.
                        Some(Segment::Var(_)) => rest.chars().next()?.len_utf8(),
                        None => rest.len(),
                    };
                    if end == 0 {
                        return None;
                    }
                    bindings.insert(name.clone(), rest[..end].to_string());
                    rest = &rest[end..];
                }
            }
        }
        rest.is_empty().then_some(bindings)
    }
}

impl fmt::Display for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
