//! Request template: what every worker sends, with the placeholder still in it.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::utils::config::{Defaults, PLACEHOLDER};

/// Immutable once the pipeline starts; shared read-only by all workers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Accept invalid TLS certificates.
    pub insecure: bool,
    /// Redirects followed before the last response is reported as-is.
    pub follow_redirect: usize,
}

/// The template with one value substituted in.
#[derive(Clone, Debug, PartialEq)]
pub struct ConcreteRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestTemplate {
    /// GET `url` with no headers, no body and no redirects followed.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            method: Defaults::METHOD.to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            insecure: false,
            follow_redirect: 0,
        }
    }

    /// Add a header given as `Name: value`.
    pub fn add_header_line(&mut self, line: &str) -> Result<(), PipelineError> {
        let (name, value) = parse_header(line)?;
        self.headers.push((name, value));
        Ok(())
    }

    /// The placeholder must appear somewhere, and at most once in the URL.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let in_url = self.url.matches(PLACEHOLDER).count();
        if in_url > 1 {
            return Err(PipelineError::Placeholder {
                placeholder: PLACEHOLDER,
                reason: "appears more than once in the URL",
            });
        }
        let elsewhere = self
            .headers
            .iter()
            .any(|(n, v)| n.contains(PLACEHOLDER) || v.contains(PLACEHOLDER))
            || self.body.as_deref().is_some_and(|b| b.contains(PLACEHOLDER));
        if in_url == 0 && !elsewhere {
            return Err(PipelineError::Placeholder {
                placeholder: PLACEHOLDER,
                reason: "not found in URL, headers or body",
            });
        }
        Ok(())
    }

    pub fn render(&self, value: &str) -> ConcreteRequest {
        let sub = |s: &str| s.replace(PLACEHOLDER, value);
        ConcreteRequest {
            method: self.method.clone(),
            url: sub(&self.url),
            headers: self
                .headers
                .iter()
                .map(|(n, v)| (sub(n), sub(v)))
                .collect(),
            body: self.body.as_deref().map(sub),
        }
    }
}

/// Split `Name: value`. The value is trimmed; an empty value is allowed.
pub fn parse_header(line: &str) -> Result<(String, String), PipelineError> {
    let invalid = || PipelineError::InvalidHeader(line.to_string());
    let (name, value) = line.split_once(':').ok_or_else(invalid)?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(invalid());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_everywhere() {
        let mut t = RequestTemplate::new("http://h/item/FUZZ?x=1");
        t.add_header_line("X-Id: FUZZ").unwrap();
        t.body = Some("{\"id\":\"FUZZ\"}".into());
        let r = t.render("42");
        assert_eq!(r.url, "http://h/item/42?x=1");
        assert_eq!(r.headers, vec![("X-Id".to_string(), "42".to_string())]);
        assert_eq!(r.body.as_deref(), Some("{\"id\":\"42\"}"));
    }

    #[test]
    fn placeholder_only_in_header_is_valid() {
        let mut t = RequestTemplate::new("http://h/");
        t.add_header_line("Cookie: session=FUZZ").unwrap();
        assert!(t.validate().is_ok());
    }

    #[test]
    fn header_without_colon_is_rejected() {
        assert!(matches!(
            parse_header("Authorization Bearer x"),
            Err(PipelineError::InvalidHeader(_))
        ));
    }
}
