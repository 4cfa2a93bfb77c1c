//! Content-Type and Content-Disposition values.

use std::collections::BTreeMap;
use std::fmt;

use crate::encoding::decode_rfc2047;
use crate::error::{Error, Result};

/// A `type/subtype; key=value` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type, lower-cased.
    pub main_type: String,
    /// Subtype, lower-cased.
    pub sub_type: String,
    /// Parameters with lower-cased keys.
    pub parameters: BTreeMap<String, String>,
}

impl ContentType {
    /// Creates a content type without parameters.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// `text/plain; charset=utf-8`, the default for parts without a header.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "utf-8")
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Parses a header value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentType`] if there is no `type/subtype`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = split_params(value).into_iter();
        let essence = parts.next().unwrap_or_default();
        let (main, sub) = essence
            .split_once('/')
            .filter(|(m, s)| !m.trim().is_empty() && !s.trim().is_empty())
            .ok_or_else(|| Error::InvalidContentType(value.to_string()))?;

        let mut ct = Self::new(main.trim().to_ascii_lowercase(), sub.trim().to_ascii_lowercase());
        for (key, val) in parts.filter_map(|p| parse_param(&p)) {
            ct.parameters.insert(key, val);
        }
        Ok(ct)
    }

    /// `type/subtype` without parameters.
    #[must_use]
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Returns true for `multipart/*`.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Returns true for `image/*`.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.main_type == "image"
    }

    /// Returns the boundary parameter.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Returns the `name` parameter, decoded.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.parameters.get("name").map(|n| decode_rfc2047(n))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;
        for (key, value) in &self.parameters {
            write!(f, "; {key}=\"{value}\"")?;
        }
        Ok(())
    }
}

/// Extracts `filename` from a Content-Disposition value.
#[must_use]
pub fn disposition_filename(value: &str) -> Option<String> {
    split_params(value)
        .into_iter()
        .skip(1)
        .filter_map(|p| parse_param(&p))
        .find(|(k, _)| k == "filename")
        .map(|(_, v)| decode_rfc2047(&v))
}

/// Splits on `;` outside quoted strings.
fn split_params(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_param(param: &str) -> Option<(String, String)> {
    let (key, value) = param.split_once('=')?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((key.trim().to_ascii_lowercase(), value.to_string()))
}
