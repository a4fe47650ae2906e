use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;

use crate::{core::RouterResult, utils::response::content_type};

pub const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

/// An inbound request, immutable once received.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// The single response produced for a request.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseEnvelope {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseEnvelope {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, Bytes::new())
    }

    /// Serializes `data` as the JSON body.
    pub fn json<T: Serialize>(status: StatusCode, data: &T) -> RouterResult<Self> {
        let body = serde_json::to_vec(data)?;
        Ok(Self::new(status, body).with_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type::APPLICATION_JSON),
        ))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
