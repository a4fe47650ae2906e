use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use serde_yaml::Value as YamlValue;

use crate::{
    backend::{task::ExecutionRole, EndpointResolver, ListenerEndpoint},
    core::RouterResult,
    router::{Request, ResponseEnvelope},
};

use super::{parse_options, reject_role, Collaborators, RouteHandler};

pub const HANDLER_NAME: &str = "endpoints";

#[derive(Default, Debug, Serialize, Deserialize)]
struct HandlerConfig {
    #[serde(default)]
    listeners: Vec<String>,
}

/// Reports the current endpoint of each configured listener.
pub struct EndpointsHandler {
    listeners: Vec<ListenerEndpoint>,
}

pub fn create_endpoints_handler(
    collaborators: &Collaborators,
    cfg: YamlValue,
    role: Option<ExecutionRole>,
) -> RouterResult<Arc<dyn RouteHandler>> {
    reject_role(HANDLER_NAME, &role)?;
    let config: HandlerConfig = parse_options(HANDLER_NAME, cfg)?;

    let listeners = config
        .listeners
        .iter()
        .map(|name| collaborators.listener(name).map(|(endpoint, _)| endpoint))
        .collect::<RouterResult<Vec<_>>>()?;

    Ok(Arc::new(EndpointsHandler { listeners }))
}

#[async_trait]
impl RouteHandler for EndpointsHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    async fn serve(&self, _request: &Request) -> RouterResult<ResponseEnvelope> {
        let mut body = Map::new();
        for listener in &self.listeners {
            let endpoint = listener.resolve()?;
            body.insert(listener.name().to_string(), serde_json::to_value(endpoint)?);
        }
        ResponseEnvelope::json(StatusCode::OK, &JsonValue::Object(body))
    }
}
