use bytes::{Bytes, BytesMut};
use pingora::protocols::http::ServerSession;
use pingora_error::Result;
use pingora_http::RequestHeader;

use crate::router::Request;

/// Retrieves the value of a specific header from the request.
///
/// Returns `None` if the header is not present or its value is not valid UTF-8.
pub fn get_req_header_value<'a>(req_header: &'a RequestHeader, key: &str) -> Option<&'a str> {
    req_header
        .headers
        .get(key)
        .and_then(|value| value.to_str().ok())
}

/// Drains the downstream request body. `None` when the request has none.
pub async fn read_request_body(http_session: &mut ServerSession) -> Result<Option<Bytes>> {
    let mut body = BytesMut::new();
    while let Some(chunk) = http_session.read_request_body().await? {
        body.extend_from_slice(&chunk);
    }
    Ok((!body.is_empty()).then(|| body.freeze()))
}

/// Snapshot of a downstream request handed to route handlers.
pub fn router_request(req_header: &RequestHeader, body: Option<Bytes>) -> Request {
    Request {
        method: req_header.method.clone(),
        path: req_header.uri.path().to_string(),
        headers: req_header.headers.clone(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;

    #[test]
    fn test_router_request_drops_query() {
        let mut header = RequestHeader::build("GET", b"/custom?refresh=1", None).unwrap();
        header.insert_header("X-Api-Key", "secret").unwrap();

        let request = router_request(&header, None);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.path, "/custom");
        assert_eq!(request.headers.get("x-api-key").unwrap(), "secret");
        assert!(request.body.is_none());
    }

    #[test]
    fn test_get_req_header_value() {
        let mut header = RequestHeader::build("PUT", b"/", None).unwrap();
        header.insert_header("X-Api-Key", "secret").unwrap();

        assert_eq!(get_req_header_value(&header, "x-api-key"), Some("secret"));
        assert_eq!(get_req_header_value(&header, "missing"), None);
    }
}
