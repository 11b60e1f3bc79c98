//! Virtual-user scripts: fixed sequences of typed steps.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SetupScope;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub setup: Vec<Step>,
    pub steps: Vec<Step>,
    pub teardown: Vec<Step>,
    pub setup_scope: SetupScope,
}

impl Script {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::InvalidScript(
                "`steps` must contain at least one step".to_string(),
            ));
        }

        for (section, steps) in [
            ("setup", &self.setup),
            ("steps", &self.steps),
            ("teardown", &self.teardown),
        ] {
            for (idx, step) in steps.iter().enumerate() {
                step.validate()
                    .map_err(|reason| Error::InvalidScript(format!("{section}[{idx}]: {reason}")))?;
            }
        }
        Ok(())
    }

    /// Every step across setup, main sequence and teardown.
    pub fn all_steps(&self) -> impl Iterator<Item = &Step> {
        self.setup
            .iter()
            .chain(self.steps.iter())
            .chain(self.teardown.iter())
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Request(RequestStep),
    Check(CheckStep),
    Sleep(Duration),
    Extract(ExtractStep),
}

impl Step {
    pub fn is_critical(&self) -> bool {
        match self {
            Step::Request(r) => r.critical,
            Step::Check(c) => c.critical,
            Step::Extract(e) => e.critical,
            Step::Sleep(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Request(_) => "request",
            Step::Check(_) => "check",
            Step::Sleep(_) => "sleep",
            Step::Extract(_) => "extract",
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Step::Request(r) if r.url.trim().is_empty() => Err("request url is empty".to_string()),
            Step::Check(c) if c.checks.is_empty() => {
                Err("check step needs at least one check".to_string())
            }
            Step::Check(c) => match c.checks.iter().find(|spec| spec.name.trim().is_empty()) {
                Some(_) => Err("check names must not be empty".to_string()),
                None => Ok(()),
            },
            Step::Extract(e) if e.var.trim().is_empty() => {
                Err("extract step needs a variable name".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestStep {
    /// Metric tag; defaults to the unrendered URL so templated ids do not
    /// explode series cardinality.
    pub name: Arc<str>,
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
    pub critical: bool,
}

impl RequestStep {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: Arc::from(url.as_str()),
            method,
            url,
            headers: Vec::new(),
            body: None,
            timeout: None,
            critical: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Arc::from(name);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    /// Sent with `content-type: application/json` unless the step sets one.
    Json(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct CheckStep {
    pub checks: Vec<CheckSpec>,
    pub critical: bool,
}

#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub name: String,
    pub expect: CheckPredicate,
}

impl CheckSpec {
    pub fn new(name: impl Into<String>, expect: CheckPredicate) -> Self {
        Self {
            name: name.into(),
            expect,
        }
    }
}

/// Assertion over the most recent response of the VU.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckPredicate {
    Status(u16),
    StatusIn(Vec<u16>),
    BodyContains(String),
    JsonExists(String),
    JsonEquals {
        path: String,
        value: serde_json::Value,
    },
    HeaderExists(String),
    HeaderEquals {
        name: String,
        value: String,
    },
    DurationBelow(Duration),
}

#[derive(Debug, Clone)]
pub struct ExtractStep {
    pub var: String,
    pub from: ExtractSource,
    pub critical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractSource {
    /// Dotted path into the JSON body, e.g. `data.items.0.id`.
    Json(String),
    Header(String),
    Status,
    Body,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_main_sequence_is_invalid() {
        let err = Script::default().validate();
        assert!(matches!(err, Err(Error::InvalidScript(_))));
    }

    #[test]
    fn validation_names_the_offending_step() {
        let mut script = Script::new(vec![Step::Sleep(Duration::from_millis(1))]);
        script.setup.push(Step::Extract(ExtractStep {
            var: " ".to_string(),
            from: ExtractSource::Status,
            critical: false,
        }));
        let msg = match script.validate() {
            Err(e) => e.to_string(),
            Ok(()) => panic!("expected validation error"),
        };
        assert!(msg.contains("setup[0]"), "{msg}");

        let script = Script::new(vec![Step::Check(CheckStep {
            checks: vec![],
            critical: false,
        })]);
        assert!(script.validate().is_err());
    }

    #[test]
    fn request_name_defaults_to_url() {
        let step = RequestStep::get("/products/${id}");
        assert_eq!(&*step.name, "/products/${id}");
        assert_eq!(&*step.named("product").name, "product");
    }

    #[test]
    fn criticality_per_step_kind() {
        assert!(Step::Request(RequestStep::get("/x").critical()).is_critical());
        assert!(!Step::Sleep(Duration::ZERO).is_critical());
    }
}
