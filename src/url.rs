//! URL templates with `${name}` parameter placeholders.
//!
//! A template such as `http://host/v1/${version}/stations/${stationId}` is
//! scanned once at startup; the ordered placeholder list becomes the
//! endpoint's canonical URL-parameter set, and expansion substitutes request
//! bindings back into the template.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// A scanned URL template and its ordered placeholder names.
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    template: String,
    params: Vec<String>,
}

enum ScanState {
    Default,
    Tag,
}

impl UrlTemplate {
    /// Scan a template for `${name}` placeholders.
    ///
    /// Placeholder names are non-empty and alphanumeric. A `$` not followed
    /// by `{`, an unterminated tag, an empty tag, or an illegal character
    /// inside a tag is an error.
    pub fn parse(template: &str) -> Result<Self> {
        let bytes = template.as_bytes();
        let len = bytes.len();
        let mut params = Vec::new();
        let mut state = ScanState::Default;
        let mut tag_start = 0;
        let mut i = 0;

        while i < len {
            match state {
                ScanState::Default => {
                    if bytes[i] == b'$' {
                        if i + 1 == len {
                            return Err(Error::UrlTemplate("unexpected end of tag".to_string()));
                        }
                        if bytes[i + 1] != b'{' {
                            return Err(Error::UrlTemplate(format!(
                                "expected character \"{{\" at pos {}",
                                i + 1
                            )));
                        }
                        i += 2;
                        tag_start = i;
                        state = ScanState::Tag;
                        continue;
                    }
                    i += 1;
                }
                ScanState::Tag => {
                    let c = bytes[i];
                    if c == b'}' {
                        if i == tag_start {
                            return Err(Error::UrlTemplate(format!("empty tag at pos {}", i)));
                        }
                        params.push(template[tag_start..i].to_string());
                        state = ScanState::Default;
                    } else if !c.is_ascii_alphanumeric() {
                        return Err(Error::UrlTemplate(format!(
                            "non alpha-numeric (a-z or 0-9) character in tag at pos {}",
                            i
                        )));
                    }
                    i += 1;
                }
            }
        }
        if matches!(state, ScanState::Tag) {
            return Err(Error::UrlTemplate("unexpected end of tag".to_string()));
        }

        Ok(UrlTemplate {
            template: template.to_string(),
            params,
        })
    }

    /// Placeholder names in template order.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Substitute each `${name}` with the caller's binding for `name`.
    /// Missing bindings expand to the empty string.
    #[must_use]
    pub fn expand(&self, bindings: &HashMap<String, String>) -> String {
        let mut url = self.template.clone();
        for name in &self.params {
            let value = bindings.get(name).map(String::as_str).unwrap_or_default();
            url = url.replacen(&format!("${{{}}}", name), value, 1);
        }
        url
    }
}
