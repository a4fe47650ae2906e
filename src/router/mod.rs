//! Request dispatch.
//!
//! [`RequestRouter::resolve`] finds the route for a request and
//! [`RequestRouter::dispatch`] turns it into exactly one outcome: a response
//! envelope from a handler (or a `404`), or a forward target for the proxy
//! layer to pass the request through to. Handler failures never escape; they
//! become `500` envelopes.

pub mod envelope;
pub mod table;

use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use serde_json::Value as JsonValue;

pub use envelope::{Request, ResponseEnvelope};
pub use table::{EdgeRoute, ForwardTarget, RouteTable, RouteTarget};

use crate::{
    config::Config,
    core::{ErrorExposure, RouterError, RouterResult},
    handler::{Collaborators, RouteHandler},
    metrics::HANDLER_FAILURES,
};

/// Outcome of routing one request.
pub enum Dispatch {
    /// A response produced in-process.
    Respond(ResponseEnvelope),
    /// Pass the request through unmodified.
    Forward {
        route: Arc<EdgeRoute>,
        target: ForwardTarget,
    },
}

pub struct RequestRouter {
    table: RouteTable,
    exposure: ErrorExposure,
}

impl RequestRouter {
    pub fn new(table: RouteTable, exposure: ErrorExposure) -> Self {
        Self { table, exposure }
    }

    pub fn from_config(config: &Config, collaborators: &Collaborators) -> RouterResult<Self> {
        let table = RouteTable::from_config(&config.routes, collaborators)?;
        if table.is_empty() {
            return Err(RouterError::Configuration("No routes configured".to_string()));
        }
        Ok(Self::new(table, (&config.edgerouter.error_exposure).into()))
    }

    pub fn resolve(&self, method: &Method, path: &str) -> Option<Arc<EdgeRoute>> {
        self.table.resolve(method, path)
    }

    /// Produces the outcome for a request and the route resolved for it.
    pub async fn dispatch(&self, route: Option<Arc<EdgeRoute>>, request: &Request) -> Dispatch {
        let Some(route) = route else {
            log::debug!("No route for {} {}", request.method, request.path);
            return Dispatch::Respond(ResponseEnvelope::not_found());
        };

        match &route.target {
            RouteTarget::Forward(target) => Dispatch::Forward {
                target: target.clone(),
                route,
            },
            RouteTarget::Handler(handler) => {
                Dispatch::Respond(self.invoke(&route.id, handler, request).await)
            }
        }
    }

    /// Runs a handler to completion and normalizes its failure.
    ///
    /// The handler runs on its own task, so it finishes even if the caller
    /// goes away, and a panic inside it is reported like any other failure.
    pub async fn invoke(
        &self,
        route_id: &str,
        handler: &Arc<dyn RouteHandler>,
        request: &Request,
    ) -> ResponseEnvelope {
        let task = {
            let handler = handler.clone();
            let request = request.clone();
            tokio::spawn(async move { handler.serve(&request).await })
        };

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(RouterError::HandlerInternal(format!(
                "Handler '{}' aborted: {e}",
                handler.name()
            ))),
        };

        match outcome {
            Ok(envelope) => envelope,
            Err(err) => {
                HANDLER_FAILURES
                    .with_label_values(&[route_id, err.name()])
                    .inc();
                self.failure_envelope(route_id, &err)
            }
        }
    }

    fn failure_envelope(&self, route_id: &str, err: &RouterError) -> ResponseEnvelope {
        let fields = err.to_fields();
        log::error!(
            "Route '{route_id}' failed: {}",
            JsonValue::Object(fields.clone())
        );

        let body = JsonValue::Object(self.exposure.apply(fields));
        ResponseEnvelope::json(StatusCode::INTERNAL_SERVER_ERROR, &body).unwrap_or_else(|e| {
            log::error!("Failed to serialize failure for '{route_id}': {e}");
            ResponseEnvelope::new(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        backend::{Endpoint, EndpointResolver},
        handler::{cache_aside::PAGE_KEY, testing::*},
    };

    const ROUTES: &str = r#"
- path: /test
  method: GET
  handler:
    kind: endpoints
    options:
      listeners: [nginx, nginx2]
- path: /
  method: GET
  handler:
    kind: cache_aside
    options:
      origin: nginx
- path: /run
  method: GET
  role:
    name: runRoute
    policies: [task-execution]
  handler:
    kind: run_task
- path: /custom
  method: GET
  handler:
    kind: cache_aside
    options:
      origin: custom
      powered_by: custom web server
      lookup: false
- path: /nginx
  forward: nginx
"#;

    fn router(collab: &Collaborators, exposure: ErrorExposure) -> RequestRouter {
        let routes: Vec<crate::config::Route> = serde_yaml::from_str(ROUTES).unwrap();
        let table = RouteTable::from_config(&routes, collab).unwrap_or_else(|e| panic!("{e}"));
        RequestRouter::new(table, exposure)
    }

    async fn route_request(router: &RequestRouter, method: Method, path: &str) -> Dispatch {
        let route = router.resolve(&method, path);
        router.dispatch(route, &Request::new(method, path)).await
    }

    async fn respond(router: &RequestRouter, method: Method, path: &str) -> ResponseEnvelope {
        match route_request(router, method, path).await {
            Dispatch::Respond(envelope) => envelope,
            Dispatch::Forward { route, .. } => panic!("unexpected forward via {}", route.id),
        }
    }

    fn json_body(envelope: &ResponseEnvelope) -> JsonValue {
        serde_json::from_slice(&envelope.body).unwrap()
    }

    #[tokio::test]
    async fn test_undeclared_route_is_404_with_empty_body() {
        let collab = collaborators(Default::default(), Default::default(), Default::default());
        let router = router(&collab, ErrorExposure::Full);

        for (method, path) in [
            (Method::GET, "/missing"),
            (Method::POST, "/"),
            (Method::DELETE, "/run"),
            (Method::GET, "/test/extra"),
        ] {
            let resp = respond(&router, method, path).await;
            assert_eq!(resp.status, StatusCode::NOT_FOUND);
            assert!(resp.body.is_empty());
        }
    }

    #[tokio::test]
    async fn test_cache_hit_via_router() {
        let origin = Arc::new(StaticOrigin::page("nginx-lb", "from nginx"));
        let cache = Arc::new(MemoryCache::with(PAGE_KEY, "cached"));
        let collab = collaborators(origin.clone(), cache, Default::default());
        let router = router(&collab, ErrorExposure::Full);

        let resp = respond(&router, Method::GET, "/").await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(&resp.body[..], b"cached");
        assert_eq!(resp.header_str("x-powered-by"), Some("redis"));
        assert_eq!(origin.call_count(), 0);
    }

    #[tokio::test]
    async fn test_origin_failure_is_uniform_500() {
        let origin = Arc::new(StaticOrigin {
            fail: true,
            ..Default::default()
        });
        let cache = Arc::new(MemoryCache::default());
        let collab = collaborators(origin, cache.clone(), Default::default());
        let router = router(&collab, ErrorExposure::Full);

        let resp = respond(&router, Method::GET, "/").await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.header_str("content-type"), Some("application/json"));

        let body = json_body(&resp);
        assert!(body["message"].is_string());
        assert_eq!(body["name"], "UpstreamUnavailable");
        assert_eq!(body["upstream"], "nginx");
        assert_eq!(body["hostname"], "nginx-lb");
        assert_eq!(cache.sets.load(Ordering::SeqCst), 0);
        assert!(cache.value(PAGE_KEY).is_none());
    }

    #[tokio::test]
    async fn test_allow_list_redacts_failure_fields() {
        let origin = Arc::new(StaticOrigin {
            fail: true,
            ..Default::default()
        });
        let collab = collaborators(origin, Default::default(), Default::default());
        let router = router(&collab, ErrorExposure::AllowList(vec!["name".into()]));

        let body = json_body(&respond(&router, Method::GET, "/").await);
        let mut keys: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["message".to_string(), "name".to_string()]);
    }

    #[tokio::test]
    async fn test_run_task_success_and_failure() {
        let invoker = Arc::new(FakeInvoker {
            task_ids: vec!["arn:task/1".into()],
            ..Default::default()
        });
        let collab = collaborators(Default::default(), Default::default(), invoker);
        let resp = respond(&router(&collab, ErrorExposure::Full), Method::GET, "/run").await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(json_body(&resp), json!({"success": true, "tasks": ["arn:task/1"]}));

        let invoker = Arc::new(FakeInvoker {
            fail: true,
            ..Default::default()
        });
        let collab = collaborators(Default::default(), Default::default(), invoker);
        let resp = respond(&router(&collab, ErrorExposure::Full), Method::GET, "/run").await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(&resp);
        assert!(body.get("tasks").is_none());
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_unresolvable_listener_is_500() {
        let collab = collaborators(Default::default(), Default::default(), Default::default());
        let router = router(&collab, ErrorExposure::Full);
        collab.listeners.remove("nginx2");

        let resp = respond(&router, Method::GET, "/test").await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&resp)["listener"], "nginx2");
    }

    #[tokio::test]
    async fn test_forward_dispatch_sees_current_endpoint() {
        let collab = collaborators(Default::default(), Default::default(), Default::default());
        let router = router(&collab, ErrorExposure::Full);
        collab.listeners.set("nginx", Endpoint::new("nginx-lb-2", 8080));

        for method in [Method::GET, Method::POST] {
            match route_request(&router, method, "/nginx/index.html").await {
                Dispatch::Forward { route, target } => {
                    assert_eq!(route.id, "/nginx");
                    let endpoint = target.backend.resolve().unwrap_or_else(|e| panic!("{e}"));
                    assert_eq!(endpoint, Endpoint::new("nginx-lb-2", 8080));
                }
                Dispatch::Respond(resp) => panic!("expected forward, got {}", resp.status),
            }
        }
    }

    struct Panicking;

    #[async_trait]
    impl RouteHandler for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn serve(&self, _request: &Request) -> RouterResult<ResponseEnvelope> {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_500() {
        let mut table = RouteTable::default();
        table.push(
            EdgeRoute::new(
                "/boom",
                Some(Method::GET),
                RouteTarget::Handler(Arc::new(Panicking)),
            )
            .unwrap_or_else(|e| panic!("{e}")),
        );
        let router = RequestRouter::new(table, ErrorExposure::Full);

        let resp = respond(&router, Method::GET, "/boom").await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&resp)["name"], "HandlerInternalError");
    }
}
