//! Building raw request bytes for endpoints under test.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::SimulationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Json,
    Form,
}

/// An HTTP/1.1 request to feed to a [`RequestEndpoint`](super::RequestEndpoint).
///
/// ```ignore
/// let request = SimRequest::new("POST", "rooms/create")
///     .shorthand("/api/v1/", &["/api", "/admin"])
///     .bearer("token")
///     .json(&serde_json::json!({"name": "test"}))?;
/// ```
#[derive(Debug, Clone)]
pub struct SimRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    content: Bytes,
    kind: ContentKind,
}

impl SimRequest {
    /// Creates a request with no body.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: Vec::new(),
            content: Bytes::new(),
            kind: ContentKind::Json,
        }
    }

    /// Prefixes the path with `prefix` unless it already starts with one of
    /// `absolute_roots`. Doubled slashes left by the join are collapsed.
    pub fn shorthand(mut self, prefix: &str, absolute_roots: &[&str]) -> Self {
        if !absolute_roots.iter().any(|root| self.path.starts_with(root)) {
            self.path = format!("{}{}", prefix, self.path).replace("//", "/");
        }
        self
    }

    /// Adds an `Authorization: Bearer` header.
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", &format!("Bearer {}", token))
    }

    /// Adds an arbitrary header. Repeated names are all sent.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Sets a raw body, sent as JSON.
    pub fn body(mut self, content: impl Into<Bytes>) -> Self {
        self.content = content.into();
        self.kind = ContentKind::Json;
        self
    }

    /// Serializes `value` as the JSON body.
    pub fn json<T: Serialize>(self, value: &T) -> SimulationResult<Self> {
        let content = serde_json::to_vec(value)?;
        Ok(self.body(content))
    }

    /// Sets a URL-encoded form body.
    pub fn form(mut self, content: impl Into<Bytes>) -> Self {
        self.content = content.into();
        self.kind = ContentKind::Form;
        self
    }

    /// Request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path, always starting with `/`.
    pub fn path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }

    /// Headers to send, including the content type and length derived from
    /// the body.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if !self.content.is_empty() {
            let content_type = match self.kind {
                ContentKind::Json => "application/json",
                ContentKind::Form => "application/x-www-form-urlencoded",
            };
            headers.push(("Content-Type".to_string(), content_type.to_string()));
            headers.push(("Content-Length".to_string(), self.content.len().to_string()));
        }
        headers
    }

    /// Request body.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Encodes the request as it would appear on the wire.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(format!("{} {} HTTP/1.1\r\n", self.method, self.path()).as_bytes());
        for (name, value) in self.headers() {
            buf.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.content);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shorthand_prefixes_relative_paths() {
        let request = SimRequest::new("GET", "/sync").shorthand("/api/v1/", &["/api", "/admin"]);
        assert_eq!(request.path(), "/api/v1/sync");

        let request =
            SimRequest::new("GET", "/admin/users").shorthand("/api/v1/", &["/api", "/admin"]);
        assert_eq!(request.path(), "/admin/users");

        assert_eq!(SimRequest::new("GET", "status").path(), "/status");
    }

    #[test]
    fn encodes_json_request() {
        let request = SimRequest::new("POST", "/rooms")
            .bearer("secret")
            .json(&json!({"a": 1}))
            .unwrap();

        let expected = "POST /rooms HTTP/1.1\r\n\
                        Authorization: Bearer secret\r\n\
                        Content-Type: application/json\r\n\
                        Content-Length: 7\r\n\
                        \r\n\
                        {\"a\":1}";
        assert_eq!(request.to_bytes(), Bytes::from(expected));
    }

    #[test]
    fn form_content_type() {
        let request = SimRequest::new("POST", "/login").form("user=a&pass=b");
        assert!(request.headers().contains(&(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string()
        )));
    }

    #[test]
    fn empty_body_has_no_content_headers() {
        let request = SimRequest::new("GET", "/");
        assert!(request.headers().is_empty());
        assert_eq!(request.to_bytes(), Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n"));
    }
}
