use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest identifier Postgres keeps without truncation (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A database, schema, user or role name that is safe to interpolate into an
/// administrative statement.
///
/// Allowed: an ASCII letter or `_` first, then ASCII letters, digits or `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(name: &str) -> Result<Self> {
        validate_fragment(name)?;

        if name.is_empty() {
            return Err(anyhow!("identifier is empty"));
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(anyhow!("identifier `{}` must not start with a digit", name));
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(anyhow!(
                "identifier `{}` is longer than {} characters",
                name,
                MAX_IDENTIFIER_LEN
            ));
        }

        Ok(Self(name.to_string()))
    }

    /// Build `prefix + self + suffix` and validate the result.
    pub fn derive(&self, prefix: &str, suffix: &str) -> Result<Self> {
        Self::new(&format!("{}{}{}", prefix, self.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for SQL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

/// Check a prefix/suffix fragment: may be empty, may start with a digit, but
/// only holds identifier characters.
pub fn validate_fragment(fragment: &str) -> Result<()> {
    match fragment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        Some(c) => Err(anyhow!(
            "`{}` contains `{}`, only ASCII letters, digits and `_` are allowed",
            fragment,
            c
        )),
        None => Ok(()),
    }
}

/// Quote a name read back from the catalog. These are not validated, so
/// embedded double quotes are doubled.
pub fn quote_ident(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

/// Quote a string literal for SQL.
pub fn quote_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

/// Quote a string for a MongoDB shell script.
pub fn js_string(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl std::str::FromStr for Identifier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
