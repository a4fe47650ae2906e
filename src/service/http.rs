use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_error::{Error, ErrorType::InternalError, OkOrErr, Result};
use pingora_proxy::{ProxyHttp, Session};

use crate::{
    backend::{EndpointResolver, Scheme},
    metrics::REQUESTS,
    router::{Dispatch, EdgeRoute, ForwardTarget, Request, RequestRouter, ResponseEnvelope},
    utils::{
        request::{read_request_body, router_request},
        response::ResponseBuilder,
    },
};

use super::discovery::resolve_socket_addr;

/// Per-request state.
pub struct EdgeContext {
    pub route: Option<Arc<EdgeRoute>>,
    pub forward: Option<ForwardTarget>,
    pub request_start: Instant,
}

impl EdgeContext {
    /// Records a dispatch outcome. Returns the envelope to send downstream,
    /// or `None` when the request is to be proxied.
    fn accept(&mut self, dispatch: Dispatch) -> Option<ResponseEnvelope> {
        match dispatch {
            Dispatch::Respond(envelope) => Some(envelope),
            Dispatch::Forward { target, .. } => {
                self.forward = Some(target);
                None
            }
        }
    }
}

/// Builds the upstream peer for a forward from the listener's current endpoint.
async fn forward_peer(target: &ForwardTarget) -> Result<Box<HttpPeer>> {
    let endpoint = target.backend.resolve()?;
    let addr = resolve_socket_addr(&endpoint).await?;
    log::debug!(
        "Forwarding to '{}' at {} ({})",
        target.backend.name(),
        endpoint,
        addr
    );

    let tls = target.scheme == Scheme::HTTPS;
    Ok(Box::new(HttpPeer::new(addr, tls, endpoint.hostname)))
}

/// Edge service.
///
/// Handler routes are answered in `request_filter`; structural forwards fall
/// through to the proxy phase untouched.
pub struct EdgeService {
    router: Arc<RequestRouter>,
}

impl EdgeService {
    pub fn new(router: Arc<RequestRouter>) -> Self {
        Self { router }
    }

    /// Routes one request, leaving the forward target (if any) in `ctx`.
    async fn route_request(
        &self,
        ctx: &mut EdgeContext,
        route: Option<Arc<EdgeRoute>>,
        request: &Request,
    ) -> Option<ResponseEnvelope> {
        ctx.route = route.clone();
        ctx.accept(self.router.dispatch(route, request).await)
    }
}

#[async_trait]
impl ProxyHttp for EdgeService {
    type CTX = EdgeContext;

    /// Creates a new context for each request
    fn new_ctx(&self) -> Self::CTX {
        EdgeContext {
            route: None,
            forward: None,
            request_start: Instant::now(),
        }
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let (method, path) = {
            let req_header = session.req_header();
            (req_header.method.clone(), req_header.uri.path().to_string())
        };

        let route = self.router.resolve(&method, &path);

        // Forwarded bodies stream through to the upstream untouched.
        let body = match route.as_deref() {
            Some(route) if !route.is_forward() => {
                read_request_body(session.as_downstream_mut()).await?
            }
            _ => None,
        };
        let request = router_request(session.req_header(), body);

        match self.route_request(ctx, route, &request).await {
            Some(envelope) => {
                ResponseBuilder::send_envelope(session, envelope).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resolves the forward target's endpoint afresh for every request
    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let target = ctx
            .forward
            .as_ref()
            .or_err(InternalError, "Upstream selected without a forward route")?;

        forward_peer(target).await
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX) {
        let code = session
            .response_written()
            .map_or(0, |resp| resp.status.as_u16());
        let route = ctx.route.as_ref().map_or("", |r| r.id.as_str());

        REQUESTS
            .with_label_values(&[route, &code.to_string()])
            .inc();

        if let Some(e) = e {
            log::warn!(
                "{} {} failed after {:?}: {}",
                session.req_header().method,
                session.req_header().uri,
                ctx.request_start.elapsed(),
                e
            );
        }
    }
}
