//! Header value object and header collection for the transport envelope.
//!
//! # Design
//! `Headers` keeps every `(name, value)` pair in arrival order so repeated
//! headers (`Set-Cookie`, `Via`) survive untouched. Names are lower-cased on
//! insert, which makes lookups case-insensitive and gives the transport a
//! single spelling per header. Legality of names and values is checked here,
//! once, so the rest of the crate can treat headers as already valid.
//!
//! [`collect_headers`] turns any pair iterator into the name → values map the
//! transport expects. It does no validation and never fails.

use indexmap::IndexMap;

use crate::error::Error;

/// Header name → values in arrival order. This is the shape sent to the
/// transport and stored on responses.
pub type HeaderValues = IndexMap<String, Vec<String>>;

/// Group `(name, value)` pairs by name, preserving arrival order both across
/// names and within each name's value list.
pub fn collect_headers<I, K, V>(pairs: I) -> HeaderValues
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut map = HeaderValues::new();
    for (name, value) in pairs {
        map.entry(name.into()).or_default().push(value.into());
    }
    map
}

/// An ordered, case-insensitive, multi-valued header list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let (name, value) = normalize(name, value)?;
        self.entries.push((name, value));
        Ok(())
    }

    /// Replace every value for `name` with a single value.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let (name, value) = normalize(name, value)?;
        match self.entries.iter().position(|(n, _)| *n == name) {
            Some(first) => {
                self.entries[first].1 = value;
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= first || *n != name;
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
        Ok(())
    }

    /// All values for `name` joined with `", "`, or `None` when absent.
    pub fn get(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Raw pairs in arrival order, names lower-cased.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Grouped view, as sent to the transport.
    pub fn raw(&self) -> HeaderValues {
        collect_headers(self.iter())
    }

    /// Build from pairs, validating each one.
    pub fn try_from_pairs<I, K, V>(pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = Headers::new();
        for (name, value) in pairs {
            headers.append(name.as_ref(), value.as_ref())?;
        }
        Ok(headers)
    }

    /// Pairs reported by the transport. These are taken as-is apart from
    /// lower-casing the names; the host already received them off the wire.
    pub(crate) fn from_wire(pairs: Vec<(String, String)>) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self { entries }
    }
}

fn normalize(name: &str, value: &str) -> Result<(String, String), Error> {
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(Error::InvalidHeader {
            name: name.to_string(),
            reason: "not a valid HTTP header name".to_string(),
        });
    }
    let value = value.trim_matches(|c| c == ' ' || c == '\t');
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(Error::InvalidHeader {
            name: name.to_string(),
            reason: "value contains CR, LF or NUL".to_string(),
        });
    }
    Ok((name.to_ascii_lowercase(), value.to_string()))
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
