//! Admin API for inspecting and moving backing listener endpoints.

use std::{
    collections::{BTreeMap, HashMap},
    error::Error,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, Response};
use matchit::{Match, Router};
use pingora::{
    apps::http_app::ServeHttp, protocols::http::ServerSession, services::listening::Service,
};
use validator::Validate;

use crate::{
    backend::{Endpoint, ListenerRegistry},
    config::Admin,
    utils::{
        request::{get_req_header_value, read_request_body},
        response::{content_type, CommonErrors, ResponseBuilder},
    },
};

const LISTENERS_PATH: &str = "/edgerouter/admin/listeners";

/// The parts of an admin request the handlers look at.
pub struct AdminRequest {
    pub method: Method,
    pub path: String,
    pub api_key: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<Bytes>,
}

#[async_trait]
trait Handler {
    async fn handle(
        &self,
        listeners: &ListenerRegistry,
        request: &AdminRequest,
        params: BTreeMap<String, String>,
    ) -> Result<Response<Vec<u8>>, Box<dyn Error>>;
}

pub struct AdminHttpApp {
    listeners: Arc<ListenerRegistry>,
    router: Router<HashMap<Method, Box<dyn Handler + Send + Sync>>>,

    config: Admin,
}

impl AdminHttpApp {
    pub fn new(cfg: &Admin, listeners: Arc<ListenerRegistry>) -> Self {
        let mut this = Self {
            listeners,
            router: Router::new(),
            config: cfg.clone(),
        };

        let one = format!("{LISTENERS_PATH}/{{name}}");
        this.route(LISTENERS_PATH, Method::GET, Box::new(ListListenersHandler))
            .route(&one, Method::GET, Box::new(GetListenerHandler))
            .route(&one, Method::PUT, Box::new(PutListenerHandler));

        this
    }

    fn route(
        &mut self,
        path: &str,
        method: Method,
        handler: Box<dyn Handler + Send + Sync>,
    ) -> &mut Self {
        match self.router.at_mut(path) {
            Ok(routes) => {
                routes.value.insert(method, handler);
            }
            Err(_) => {
                let mut handlers = HashMap::new();
                handlers.insert(method, handler);
                if let Err(e) = self.router.insert(path, handlers) {
                    log::error!("Failed to register admin route {path}: {e}");
                }
            }
        }
        self
    }

    pub fn admin_http_service(cfg: &Admin, listeners: Arc<ListenerRegistry>) -> Service<Self> {
        let app = Self::new(cfg, listeners);
        let addr = &app.config.address.to_string();
        let mut service = Service::new("Admin HTTP".to_string(), app);
        service.add_tcp(addr);
        service
    }

    /// Authorizes and routes a request that has already been read.
    pub async fn dispatch(&self, request: &AdminRequest) -> Response<Vec<u8>> {
        if request.api_key.as_deref() != Some(self.config.api_key.as_str()) {
            return CommonErrors::forbidden();
        }

        match self.router.at(&request.path) {
            Ok(Match { value, params }) => match value.get(&request.method) {
                Some(handler) => {
                    let params: BTreeMap<String, String> = params
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect();
                    match handler.handle(&self.listeners, request, params).await {
                        Ok(resp) => resp,
                        Err(e) => CommonErrors::bad_request(&e.to_string()),
                    }
                }
                None => CommonErrors::method_not_allowed(),
            },
            Err(_) => CommonErrors::not_found(),
        }
    }
}

#[async_trait]
impl ServeHttp for AdminHttpApp {
    async fn response(&self, http_session: &mut ServerSession) -> Response<Vec<u8>> {
        http_session.set_keepalive(None);

        let (method, path, api_key, content_type) = {
            let req_header = http_session.req_header();
            (
                req_header.method.clone(),
                req_header.uri.path().to_string(),
                get_req_header_value(req_header, "x-api-key").map(str::to_string),
                get_req_header_value(req_header, header::CONTENT_TYPE.as_str()).map(str::to_string),
            )
        };

        let body = match read_request_body(http_session).await {
            Ok(body) => body,
            Err(e) => return CommonErrors::bad_request(&e.to_string()),
        };

        self.dispatch(&AdminRequest {
            method,
            path,
            api_key,
            content_type,
            body,
        })
        .await
    }
}

struct ListListenersHandler;

#[async_trait]
impl Handler for ListListenersHandler {
    async fn handle(
        &self,
        listeners: &ListenerRegistry,
        _request: &AdminRequest,
        _params: BTreeMap<String, String>,
    ) -> Result<Response<Vec<u8>>, Box<dyn Error>> {
        Ok(ResponseBuilder::success_json(&listeners.snapshot()))
    }
}

struct GetListenerHandler;

#[async_trait]
impl Handler for GetListenerHandler {
    async fn handle(
        &self,
        listeners: &ListenerRegistry,
        _request: &AdminRequest,
        params: BTreeMap<String, String>,
    ) -> Result<Response<Vec<u8>>, Box<dyn Error>> {
        let name = params.get("name").ok_or("Missing listener name")?;
        match listeners.get(name) {
            Some(endpoint) => Ok(ResponseBuilder::success_json(&endpoint)),
            None => Ok(CommonErrors::not_found()),
        }
    }
}

struct PutListenerHandler;

#[async_trait]
impl Handler for PutListenerHandler {
    async fn handle(
        &self,
        listeners: &ListenerRegistry,
        request: &AdminRequest,
        params: BTreeMap<String, String>,
    ) -> Result<Response<Vec<u8>>, Box<dyn Error>> {
        validate_content_type(request)?;
        let name = params.get("name").ok_or("Missing listener name")?;

        // Only declared listeners can move; routes are bound to them at startup.
        if !listeners.contains(name) {
            return Ok(CommonErrors::not_found());
        }

        let body = request.body.as_deref().ok_or("Missing request body")?;
        let endpoint: Endpoint =
            serde_json::from_slice(body).map_err(|e| format!("Invalid JSON data: {}", e))?;
        endpoint.validate()?;

        listeners.set(name.clone(), endpoint.clone());
        Ok(ResponseBuilder::success_json(&endpoint))
    }
}

fn validate_content_type(request: &AdminRequest) -> Result<(), Box<dyn Error>> {
    match request.content_type.as_deref() {
        Some(ct) if ct.starts_with(content_type::APPLICATION_JSON) => Ok(()),
        _ => Err("Content-Type must be application/json".into()),
    }
}
