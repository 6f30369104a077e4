//! Distinguished name parsing and LDAP filter escaping.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use adrealm_core::error::Error as CoreError;

/// Errors produced while parsing a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component was not an `attribute=value` pair.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// The distinguished name ended inside an escape sequence.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
}

impl From<DnError> for CoreError {
    fn from(err: DnError) -> Self {
        CoreError::ConfigError(err.to_string())
    }
}

/// A parsed distinguished name.
///
/// Parsing is kept deliberately simple: comma-separated `attribute=value`
/// components with backslash escaping, which is what Active Directory
/// produces for `distinguishedName` and `memberOf` values. Multi-valued RDNs
/// are not split further since AD does not emit them for the entries handled
/// here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    raw: String,
    components: Vec<(String, String)>,
}

impl DistinguishedName {
    /// Parses a distinguished name.
    ///
    /// # Errors
    ///
    /// Returns [`DnError`] if the input is empty or a component lacks an
    /// `attribute=value` shape.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, DnError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Err(DnError::Empty);
        }

        let mut components = Vec::new();
        for part in split_unescaped(raw, ',')? {
            let (attribute, value) = part
                .split_once('=')
                .ok_or_else(|| DnError::InvalidComponent(part.clone()))?;
            let attribute = attribute.trim();
            let value = value.trim();
            if attribute.is_empty() || value.is_empty() {
                return Err(DnError::InvalidComponent(part.clone()));
            }
            components.push((attribute.to_string(), unescape(value)?));
        }

        Ok(Self {
            raw: raw.to_string(),
            components,
        })
    }

    /// Borrows the original distinguished name string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the attribute/value components in order.
    #[must_use]
    pub fn components(&self) -> &[(String, String)] {
        &self.components
    }

    /// Returns the value of the first component matching `attribute`
    /// (case-insensitive).
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.components
            .iter()
            .find(|(attr, _)| attr.eq_ignore_ascii_case(attribute))
            .map(|(_, value)| value.as_str())
    }

    /// Case-insensitive equality on the raw form, used for cycle suppression
    /// when walking membership graphs.
    #[must_use]
    pub fn same_entry(&self, other: &str) -> bool {
        self.raw.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, DnError> {
        Self::parse(s)
    }
}

fn split_unescaped(input: &str, delimiter: char) -> Result<Vec<String>, DnError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escape = false;

    for ch in input.chars() {
        if escape {
            current.push('\\');
            current.push(ch);
            escape = false;
        } else if ch == '\\' {
            escape = true;
        } else if ch == delimiter {
            parts.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(ch);
        }
    }

    if escape {
        return Err(DnError::UnterminatedEscape);
    }
    parts.push(current.trim().to_string());

    if parts.iter().any(String::is_empty) {
        return Err(DnError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

fn unescape(value: &str) -> Result<String, DnError> {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            result.push(chars.next().ok_or(DnError::UnterminatedEscape)?);
        } else {
            result.push(ch);
        }
    }
    Ok(result)
}

/// Escapes a string for interpolation into an LDAP search filter (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Escapes raw bytes for interpolation into an LDAP search filter, as needed
/// for binary-valued attributes such as `objectSid`.
#[must_use]
pub fn escape_filter_bytes(bytes: &[u8]) -> String {
    let mut escaped = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        escaped.push_str(&format!("\\{byte:02x}"));
    }
    escaped
}
