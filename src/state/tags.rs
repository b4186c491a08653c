//! Tag normalization
//!
//! Users type tags separated by semicolons, commas or spaces, in any mix.
//! Internally tags are an ordered, de-duplicated list; on disk they are a
//! single string joined with `"; "`.

use std::fmt;

/// Separator used when tags are written out as one string
pub const TAG_SEPARATOR: &str = "; ";

/// Ordered list of distinct, non-empty, trimmed tags.
///
/// Order is the order the user typed them in, not sorted. Duplicates are
/// compared case-sensitively and the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(Vec<String>);

impl Tags {
    /// Parse free-form tag input
    pub fn parse(raw: &str) -> Self {
        let mut tags: Vec<String> = Vec::new();
        for token in raw.split(is_separator) {
            let token = token.trim();
            if token.is_empty() || tags.iter().any(|t| t == token) {
                continue;
            }
            tags.push(token.to_string());
        }
        Tags(tags)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(TAG_SEPARATOR))
    }
}

impl<'a> FromIterator<&'a str> for Tags {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let joined: Vec<&str> = iter.into_iter().collect();
        Tags::parse(&joined.join(";"))
    }
}

fn is_separator(c: char) -> bool {
    c == ';' || c == ',' || c.is_whitespace()
}

/// Canonical string form of free-form tag input.
///
/// Input made only of separators or whitespace yields `""`, which is how
/// "no tags" is stored.
pub fn normalize(raw: &str) -> String {
    Tags::parse(raw).to_string()
}
