use super::util::{has_header, host_header_value, parse_http_url};
use super::{Error, HttpRequest, Result};

/// Estimate bytes sent for an HTTP request.
///
/// Best-effort HTTP/1.1 framing: request line + headers + CRLF + body, with
/// Host and Content-Length counted when the caller did not set them.
pub fn estimate_http_request_bytes(req: &HttpRequest) -> Result<u64> {
    let parsed = parse_http_url(&req.url)?;
    estimate_http_request_bytes_parts(&req.method, &parsed, &req.headers, req.body.len() as u64)
}

pub(super) fn estimate_http_request_bytes_parts(
    method: &http::Method,
    url: &url::Url,
    headers: &[(String, String)],
    body_len: u64,
) -> Result<u64> {
    let uri: hyper::Uri = url
        .as_str()
        .parse()
        .map_err(|_| Error::InvalidUrl(url.to_string()))?;

    let mut bytes = request_line_bytes(method, &uri);

    for (k, v) in headers {
        bytes = bytes.saturating_add(header_bytes(k.as_bytes(), v.as_bytes()));
    }

    if !has_header(headers, "host")
        && let Some(host) = host_header_value(url)
    {
        bytes = bytes.saturating_add(header_bytes(b"host", host.as_bytes()));
    }

    if body_len != 0 && !has_header(headers, "content-length") {
        let v = body_len.to_string();
        bytes = bytes.saturating_add(header_bytes(b"content-length", v.as_bytes()));
    }

    // Blank line, then body.
    Ok(bytes.saturating_add(2).saturating_add(body_len))
}

// "METHOD SP path SP HTTP/1.1 CRLF"
fn request_line_bytes(method: &http::Method, uri: &hyper::Uri) -> u64 {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    (method.as_str().len() + 1 + path.len() + 1 + "HTTP/1.1".len() + 2) as u64
}

pub(super) fn estimate_http1_response_head_bytes(
    version: http::Version,
    status: http::StatusCode,
    headers: &http::HeaderMap,
) -> u64 {
    let mut bytes = status_line_bytes(version, status);
    for (name, value) in headers.iter() {
        bytes = bytes.saturating_add(header_bytes(name.as_str().as_bytes(), value.as_bytes()));
    }
    bytes.saturating_add(2)
}

// "HTTP/1.1 SP 200 CRLF"; the reason phrase is ignored.
fn status_line_bytes(version: http::Version, status: http::StatusCode) -> u64 {
    let version_str = match version {
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_2 => "HTTP/2",
        http::Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    };
    (version_str.len() + 1 + status.as_str().len() + 2) as u64
}

// "name: value\r\n"
fn header_bytes(name: &[u8], value: &[u8]) -> u64 {
    (name.len() + 2 + value.len() + 2) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_without_body_counts_request_line_and_host() {
        let req = HttpRequest::get("http://localhost:8080/hello");
        let n = estimate_http_request_bytes(&req).unwrap_or_else(|e| panic!("{e}"));
        // "GET /hello HTTP/1.1\r\n" = 21, "host: localhost:8080\r\n" = 22, "\r\n" = 2
        assert_eq!(n, 45);
    }

    #[test]
    fn body_adds_content_length_and_payload() {
        let bare = HttpRequest::get("http://h/p");
        let with_body = HttpRequest::post("http://h/p", "abcd");
        let a = estimate_http_request_bytes(&bare).unwrap_or_else(|e| panic!("{e}"));
        let b = estimate_http_request_bytes(&with_body).unwrap_or_else(|e| panic!("{e}"));
        // POST is one byte longer than GET, plus "content-length: 4\r\n" (19) and the body (4).
        assert_eq!(b - a, 1 + 19 + 4);
    }

    #[test]
    fn explicit_host_header_is_not_double_counted() {
        let implicit = HttpRequest::get("http://h/");
        let explicit = HttpRequest::get("http://h/").with_header("Host", "h");
        let a = estimate_http_request_bytes(&implicit).unwrap_or_else(|e| panic!("{e}"));
        let b = estimate_http_request_bytes(&explicit).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a, b);
    }

    #[test]
    fn response_head_uses_status_and_headers() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("text/plain"));
        let n = estimate_http1_response_head_bytes(
            http::Version::HTTP_11,
            http::StatusCode::OK,
            &headers,
        );
        // "HTTP/1.1 200\r\n" = 14, "content-type: text/plain\r\n" = 26, "\r\n" = 2
        assert_eq!(n, 42);
    }
}
