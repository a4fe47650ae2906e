//! Response helpers shared by the admin API and the edge service.

use http::{header, HeaderValue, Response, StatusCode};
use pingora_error::Result;
use pingora_http::ResponseHeader;
use pingora_proxy::Session;
use serde::Serialize;

use crate::router::ResponseEnvelope;

/// Standard content types
pub mod content_type {
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const APPLICATION_JSON: &str = "application/json";
}

pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Build an HTTP Response with no body for Admin API
    pub fn status_http(status: StatusCode) -> Response<Vec<u8>> {
        Self::build_http(status, None, Vec::new())
    }

    /// Build an error HTTP Response for Admin API
    pub fn error_http(status: StatusCode, message: &str) -> Response<Vec<u8>> {
        Self::build_http(
            status,
            Some(content_type::TEXT_PLAIN),
            message.as_bytes().to_vec(),
        )
    }

    /// Build a JSON success HTTP Response for Admin API
    pub fn success_json<T: Serialize>(data: &T) -> Response<Vec<u8>> {
        match serde_json::to_vec(data) {
            Ok(body) => {
                Self::build_http(StatusCode::OK, Some(content_type::APPLICATION_JSON), body)
            }
            Err(e) => {
                log::error!("Failed to serialize JSON response: {}", e);
                Self::error_http(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "JSON serialization failed",
                )
            }
        }
    }

    fn build_http(
        status: StatusCode,
        content_type: Option<&'static str>,
        body: Vec<u8>,
    ) -> Response<Vec<u8>> {
        let mut response = Response::new(body);
        *response.status_mut() = status;
        if let Some(ct) = content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        response
    }

    /// Build the downstream header for an envelope.
    pub fn envelope_header(envelope: &ResponseEnvelope) -> Result<ResponseHeader> {
        let mut resp = ResponseHeader::build(envelope.status, Some(envelope.headers.len() + 1))?;
        for (name, value) in envelope.headers.iter() {
            resp.append_header(name.clone(), value.clone())?;
        }
        resp.insert_header(header::CONTENT_LENGTH, envelope.body.len().to_string())?;
        Ok(resp)
    }

    /// Write an envelope to the downstream session, header then body.
    pub async fn send_envelope(session: &mut Session, envelope: ResponseEnvelope) -> Result<()> {
        let resp = Self::envelope_header(&envelope)?;
        let end_of_stream = envelope.body.is_empty();
        session
            .write_response_header(Box::new(resp), end_of_stream)
            .await?;

        if !end_of_stream {
            session
                .write_response_body(Some(envelope.body), true)
                .await?;
        }

        Ok(())
    }
}

/// Common error response helpers
pub struct CommonErrors;

impl CommonErrors {
    pub fn bad_request(message: &str) -> Response<Vec<u8>> {
        ResponseBuilder::error_http(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden() -> Response<Vec<u8>> {
        ResponseBuilder::status_http(StatusCode::FORBIDDEN)
    }

    pub fn not_found() -> Response<Vec<u8>> {
        ResponseBuilder::error_http(StatusCode::NOT_FOUND, "Not Found")
    }

    pub fn method_not_allowed() -> Response<Vec<u8>> {
        ResponseBuilder::status_http(StatusCode::METHOD_NOT_ALLOWED)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::router::envelope::X_POWERED_BY;

    #[test]
    fn test_error_response() {
        let response = ResponseBuilder::error_http(StatusCode::BAD_REQUEST, "Invalid input");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body(), b"Invalid input");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            content_type::TEXT_PLAIN
        );
    }

    #[test]
    fn test_json_response() {
        let data = json!({"nginx": {"hostname": "nginx-lb", "port": 80}});
        let response = ResponseBuilder::success_json(&data);
        assert_eq!(response.status(), StatusCode::OK);
        let expected = r#"{"nginx":{"hostname":"nginx-lb","port":80}}"#;
        assert_eq!(response.body(), expected.as_bytes());
    }

    #[test]
    fn test_common_errors() {
        assert_eq!(CommonErrors::forbidden().status(), StatusCode::FORBIDDEN);
        assert!(CommonErrors::forbidden().body().is_empty());
        assert_eq!(
            CommonErrors::method_not_allowed().status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(CommonErrors::not_found().body(), b"Not Found");
    }

    #[test]
    fn test_envelope_header() {
        let envelope = ResponseEnvelope::ok("Hello, world!")
            .with_header(X_POWERED_BY, HeaderValue::from_static("custom web server"));
        let resp = ResponseBuilder::envelope_header(&envelope).unwrap();

        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(
            resp.headers.get("x-powered-by").unwrap(),
            "custom web server"
        );
        assert_eq!(resp.headers.get(header::CONTENT_LENGTH).unwrap(), "13");
    }

    #[test]
    fn test_not_found_envelope_header() {
        let resp = ResponseBuilder::envelope_header(&ResponseEnvelope::not_found()).unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.headers.get(header::CONTENT_LENGTH).unwrap(), "0");
        assert!(resp.headers.get(header::CONTENT_TYPE).is_none());
    }
}
