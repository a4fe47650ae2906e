use std::sync::Arc;

use http::Method;
use matchit::Router as MatchRouter;

use crate::{
    backend::{ListenerEndpoint, Scheme},
    config,
    core::{RouterError, RouterResult},
    handler::{build_handler, Collaborators, RouteHandler},
};

/// What a matched route does with the request.
#[derive(Clone)]
pub enum RouteTarget {
    /// Application logic produces the response.
    Handler(Arc<dyn RouteHandler>),
    /// The request is passed through unmodified to a backing listener.
    Forward(ForwardTarget),
}

#[derive(Clone)]
pub struct ForwardTarget {
    pub backend: ListenerEndpoint,
    pub scheme: Scheme,
}

/// A compiled route. Handler routes match one method; forwards match any.
pub struct EdgeRoute {
    pub id: String,
    pub method: Option<Method>,
    pub target: RouteTarget,
    matcher: MatchRouter<()>,
}

impl EdgeRoute {
    pub fn new(
        path: &str,
        method: Option<Method>,
        target: RouteTarget,
    ) -> RouterResult<Self> {
        let mut matcher = MatchRouter::new();
        let insert_err = |e: matchit::InsertError| {
            RouterError::Configuration(format!("Invalid route path '{path}': {e}"))
        };

        matcher.insert(path, ()).map_err(insert_err)?;
        if let RouteTarget::Forward(_) = target {
            // A forward owns everything below its prefix.
            let subtree = format!("{}/{{*rest}}", path.trim_end_matches('/'));
            matcher.insert(subtree, ()).map_err(insert_err)?;
        }

        let id = match &method {
            Some(method) => format!("{method} {path}"),
            None => path.to_string(),
        };

        Ok(Self {
            id,
            method,
            target,
            matcher,
        })
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().map_or(true, |m| m == method) && self.matcher.at(path).is_ok()
    }

    pub fn is_forward(&self) -> bool {
        matches!(self.target, RouteTarget::Forward(_))
    }
}

/// Routes in declared order. Built once at startup, immutable afterwards.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Arc<EdgeRoute>>,
}

impl RouteTable {
    pub fn push(&mut self, route: EdgeRoute) {
        self.routes.push(Arc::new(route));
    }

    /// First route, in declared order, matching the method and path.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<Arc<EdgeRoute>> {
        self.routes
            .iter()
            .find(|route| route.matches(method, path))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn from_config(
        routes: &[config::Route],
        collaborators: &Collaborators,
    ) -> RouterResult<Self> {
        let mut table = RouteTable::default();

        for route in routes {
            let method = route
                .method
                .as_ref()
                .map(|m| {
                    Method::from_bytes(m.to_string().as_bytes()).map_err(|e| {
                        let path = &route.path;
                        RouterError::Configuration(format!("Invalid method for '{path}': {e}"))
                    })
                })
                .transpose()?;

            let target = match (&route.handler, &route.forward) {
                (Some(handler), None) => RouteTarget::Handler(build_handler(
                    &handler.kind,
                    collaborators,
                    handler.options.clone(),
                    route.role.clone(),
                )?),
                (None, Some(backend)) => {
                    let (backend, scheme) = collaborators.listener(backend)?;
                    RouteTarget::Forward(ForwardTarget { backend, scheme })
                }
                _ => {
                    return Err(RouterError::Configuration(format!(
                        "Route '{}' needs exactly one of handler or forward",
                        route.path
                    )))
                }
            };

            let edge_route = EdgeRoute::new(&route.path, method, target)?;
            log::info!("Configuring route: {}", edge_route.id);
            table.push(edge_route);
        }

        Ok(table)
    }
}
