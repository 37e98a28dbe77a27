use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// HTTP method of an outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "delete" => Ok(Method::Delete),
            _ => Err(format!("Unsupported HTTP method: {}", s)),
        }
    }
}

/// One HTTP request, consumed by a single [`crate::services::Transport::send`]
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub url: String,
    method: Option<Method>,
    headers: BTreeMap<String, String>,
    body: Option<String>,
    encoding: Option<String>,
    timeout: Option<Duration>,
}

impl RequestEnvelope {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: None,
            headers: BTreeMap::new(),
            body: None,
            encoding: None,
            timeout: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers.insert(name.into(), value.into());
        }
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON body with a matching content type
    pub fn json<T: Serialize>(self, payload: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_string(payload)?;
        Ok(self.header("content-type", "application/json").body(body))
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// GET unless a body is present, in which case POST
    pub fn resolved_method(&self) -> Method {
        match self.method {
            Some(method) => method,
            None if self.body.is_some() => Method::Post,
            None => Method::Get,
        }
    }

    /// Headers with any caller supplied content-length removed
    pub fn outgoing_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("content-length"))
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_str(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn response_encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Response normalized across transports
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status_code: u16,
    pub ok: bool,
    pub body: String,
    pub body_bytes: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            status_code,
            ok: (200..300).contains(&status_code),
            body_bytes: body.as_bytes().to_vec(),
            body,
        }
    }
}
