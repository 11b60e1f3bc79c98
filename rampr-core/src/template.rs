//! `${name}` substitution for URLs, header values and request bodies.
//!
//! Lookup order: VU-local variables, shared setup variables, the built-ins
//! `__VU` and `__ITER`, then `__ENV.NAME` from the run's environment snapshot.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::config::EnvVars;

pub type Vars = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unresolved variable `${{{0}}}`")]
    Unresolved(String),

    #[error("unterminated `${{` in `{0}`")]
    Unterminated(String),
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateScope<'a> {
    pub locals: &'a Vars,
    pub shared: &'a Vars,
    pub vu_id: u64,
    pub iteration: u64,
    pub env: &'a EnvVars,
}

impl TemplateScope<'_> {
    fn lookup(&self, name: &str) -> Option<Cow<'_, str>> {
        if let Some(v) = self.locals.get(name).or_else(|| self.shared.get(name)) {
            return Some(Cow::Borrowed(v.as_str()));
        }
        match name {
            "__VU" => Some(Cow::Owned(self.vu_id.to_string())),
            "__ITER" => Some(Cow::Owned(self.iteration.to_string())),
            _ => {
                let key = name.strip_prefix("__ENV.")?;
                self.env
                    .iter()
                    .find(|(k, _)| &**k == key)
                    .map(|(_, v)| Cow::Borrowed(&**v))
            }
        }
    }
}

pub fn render<'t>(template: &'t str, scope: &TemplateScope<'_>) -> Result<Cow<'t, str>, TemplateError> {
    if !template.contains("${") {
        return Ok(Cow::Borrowed(template));
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| TemplateError::Unterminated(template.to_string()))?;
        let name = after[..end].trim();
        let value = scope
            .lookup(name)
            .ok_or_else(|| TemplateError::Unresolved(name.to_string()))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Cow::Owned(out))
}

/// Renders every string (keys excluded) inside a JSON document.
pub fn render_json(
    value: &serde_json::Value,
    scope: &TemplateScope<'_>,
) -> Result<serde_json::Value, TemplateError> {
    use serde_json::Value;

    Ok(match value {
        Value::String(s) => Value::String(render(s, scope)?.into_owned()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_json(v, scope))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| render_json(v, scope).map(|v| (k.clone(), v)))
                .collect::<Result<_, _>>()?,
        ),
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn env() -> EnvVars {
        Arc::from(vec![(Arc::from("HOST"), Arc::from("example.test"))])
    }

    #[test]
    fn plain_strings_are_borrowed() {
        let (l, s, e) = (Vars::new(), Vars::new(), env());
        let scope = TemplateScope {
            locals: &l,
            shared: &s,
            vu_id: 1,
            iteration: 0,
            env: &e,
        };
        assert!(matches!(render("/products", &scope), Ok(Cow::Borrowed(_))));
    }

    #[test]
    fn locals_shadow_shared_and_builtins_resolve() {
        let locals = Vars::from([("token".to_string(), "local".to_string())]);
        let shared = Vars::from([
            ("token".to_string(), "shared".to_string()),
            ("user".to_string(), "emily".to_string()),
        ]);
        let e = env();
        let scope = TemplateScope {
            locals: &locals,
            shared: &shared,
            vu_id: 7,
            iteration: 3,
            env: &e,
        };

        let out = render("Bearer ${token} ${user} vu=${__VU} it=${ __ITER } h=${__ENV.HOST}", &scope)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out, "Bearer local emily vu=7 it=3 h=example.test");
    }

    #[test]
    fn missing_variables_fail() {
        let (l, s, e) = (Vars::new(), Vars::new(), env());
        let scope = TemplateScope {
            locals: &l,
            shared: &s,
            vu_id: 1,
            iteration: 0,
            env: &e,
        };
        assert_eq!(
            render("x${nope}", &scope).err(),
            Some(TemplateError::Unresolved("nope".to_string()))
        );
        assert_eq!(
            render("${__ENV.MISSING}", &scope).err(),
            Some(TemplateError::Unresolved("__ENV.MISSING".to_string()))
        );
        assert!(matches!(
            render("x${open", &scope),
            Err(TemplateError::Unterminated(_))
        ));
    }

    #[test]
    fn json_bodies_render_nested_strings() {
        let locals = Vars::from([("name".to_string(), "emilys".to_string())]);
        let (s, e) = (Vars::new(), env());
        let scope = TemplateScope {
            locals: &locals,
            shared: &s,
            vu_id: 2,
            iteration: 0,
            env: &e,
        };
        let body = serde_json::json!({"username": "${name}", "tags": ["vu-${__VU}"], "n": 1});
        let out = render_json(&body, &scope).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            out,
            serde_json::json!({"username": "emilys", "tags": ["vu-2"], "n": 1})
        );
    }
}
