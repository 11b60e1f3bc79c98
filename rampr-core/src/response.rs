use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use rampr_http::HttpResponse;
use serde_json::Value;

/// Read-only view of a response that checks and extract steps inspect.
#[derive(Debug)]
pub struct ResponseView {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub latency: Duration,
    json: OnceLock<Option<Value>>,
}

impl ResponseView {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Bytes, latency: Duration) -> Self {
        Self {
            status,
            headers,
            body,
            latency,
            json: OnceLock::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Body parsed as JSON on first use; `None` if it is not JSON.
    pub fn json(&self) -> Option<&Value> {
        self.json
            .get_or_init(|| serde_json::from_slice(&self.body).ok())
            .as_ref()
    }

    pub fn json_path(&self, path: &str) -> Option<&Value> {
        lookup_json_path(self.json()?, path)
    }
}

impl From<HttpResponse> for ResponseView {
    fn from(res: HttpResponse) -> Self {
        Self::new(res.status, res.headers, res.body, res.elapsed)
    }
}

/// Resolves a dotted path such as `products.0.title`. Numeric segments index
/// arrays; an empty path or `$` is the document root.
pub fn lookup_json_path<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    let path = path.trim();
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() || path == "$" {
        return Some(root);
    }

    path.split('.').try_fold(root, |cur, seg| match cur {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// String form used when a JSON value is stored in a variable: strings are
/// unquoted, everything else is compact JSON.
pub fn json_to_var(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_path_walks_objects_and_arrays() {
        let doc = json!({"products": [{"id": 1, "title": "a"}, {"id": 2}], "total": 2});
        assert_eq!(lookup_json_path(&doc, "total"), Some(&json!(2)));
        assert_eq!(lookup_json_path(&doc, "products.1.id"), Some(&json!(2)));
        assert_eq!(lookup_json_path(&doc, "$.products.0.title"), Some(&json!("a")));
        assert_eq!(lookup_json_path(&doc, "$"), Some(&doc));
        assert_eq!(lookup_json_path(&doc, "products.9"), None);
        assert_eq!(lookup_json_path(&doc, "products.x"), None);
        assert_eq!(lookup_json_path(&doc, "total.deeper"), None);
    }

    #[test]
    fn view_parses_json_lazily_and_tolerates_non_json() {
        let view = ResponseView::new(
            200,
            vec![("content-type".to_string(), "application/json".to_string())],
            Bytes::from_static(br#"{"token":"abc"}"#),
            Duration::from_millis(5),
        );
        assert_eq!(view.json_path("token"), Some(&json!("abc")));
        assert_eq!(view.header("Content-Type"), Some("application/json"));

        let text = ResponseView::new(200, vec![], Bytes::from_static(b"hello"), Duration::ZERO);
        assert!(text.json().is_none());
        assert_eq!(text.body_text(), "hello");
    }

    #[test]
    fn json_to_var_unquotes_strings() {
        assert_eq!(json_to_var(&json!("abc")), "abc");
        assert_eq!(json_to_var(&json!(42)), "42");
        assert_eq!(json_to_var(&json!({"a": true})), r#"{"a":true}"#);
    }
}
