pub mod cache_aside;
pub mod endpoints;
pub mod run_task;

use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde_yaml::Value as YamlValue;

use crate::{
    backend::{
        cache::{CacheStore, RedisCache},
        origin::{HttpOriginClient, OriginClient},
        task::{ExecutionRole, HttpTaskInvoker, RunTask, TaskInvoker},
        ListenerEndpoint, ListenerRegistry, Scheme,
    },
    config::Config,
    core::{ErrorContext, RouterError, RouterResult},
    router::{Request, ResponseEnvelope},
};

/// Application logic behind a declared route.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Produces the response, or a failure the router turns into a `500`.
    async fn serve(&self, request: &Request) -> RouterResult<ResponseEnvelope>;
}

/// Shared collaborators handed to handler factories.
pub struct Collaborators {
    pub listeners: Arc<ListenerRegistry>,
    pub schemes: BTreeMap<String, Scheme>,
    pub origin: Arc<dyn OriginClient>,
    pub cache: Option<Arc<dyn CacheStore>>,
    pub tasks: Option<(Arc<dyn TaskInvoker>, RunTask)>,
}

impl Collaborators {
    /// Seeds the listener registry and wires the network-backed collaborators.
    pub fn from_config(config: &Config, listeners: Arc<ListenerRegistry>) -> RouterResult<Self> {
        for (name, backend) in &config.backends {
            listeners.set(name.clone(), backend.endpoint());
        }

        let client = reqwest::Client::builder()
            .build()
            .with_context("Building HTTP client")?;

        let cache = config.cache.as_ref().map(|cache| {
            Arc::new(RedisCache::new(
                listeners.endpoint(cache.backend.clone()),
                cache.password.clone(),
            )) as Arc<dyn CacheStore>
        });

        let tasks = config.task_pool.as_ref().map(|pool| {
            let scheme = config
                .backends
                .get(&pool.backend)
                .map(|b| b.scheme)
                .unwrap_or_default();
            let invoker = Arc::new(HttpTaskInvoker::new(
                client.clone(),
                listeners.endpoint(pool.backend.clone()),
                scheme,
            )) as Arc<dyn TaskInvoker>;
            let request = RunTask {
                cluster: pool.cluster.clone(),
                task_definition: pool.task_definition.clone(),
            };
            (invoker, request)
        });

        Ok(Self {
            schemes: config
                .backends
                .iter()
                .map(|(name, b)| (name.clone(), b.scheme))
                .collect(),
            listeners,
            origin: Arc::new(HttpOriginClient::new(client)),
            cache,
            tasks,
        })
    }

    /// Accessor for a backend that must be declared.
    pub fn listener(&self, name: &str) -> RouterResult<(ListenerEndpoint, Scheme)> {
        let scheme = self.schemes.get(name).copied().ok_or_else(|| {
            RouterError::Configuration(format!("Backend '{name}' is not declared"))
        })?;
        Ok((self.listeners.endpoint(name), scheme))
    }
}

pub type HandlerCreateFn = fn(
    &Collaborators,
    YamlValue,
    Option<ExecutionRole>,
) -> RouterResult<Arc<dyn RouteHandler>>;

/// Global registry mapping handler kinds to their factory functions.
static HANDLER_BUILDER_REGISTRY: Lazy<HashMap<&'static str, HandlerCreateFn>> = Lazy::new(|| {
    let arr: Vec<(&str, HandlerCreateFn)> = vec![
        (endpoints::HANDLER_NAME, endpoints::create_endpoints_handler),
        (cache_aside::HANDLER_NAME, cache_aside::create_cache_aside_handler),
        (run_task::HANDLER_NAME, run_task::create_run_task_handler),
    ];
    arr.into_iter().collect()
});

/// Creates a handler from its configured kind and options.
///
/// `role` is only accepted by handlers that need elevated permissions;
/// every other factory rejects it.
pub fn build_handler(
    kind: &str,
    collaborators: &Collaborators,
    options: YamlValue,
    role: Option<ExecutionRole>,
) -> RouterResult<Arc<dyn RouteHandler>> {
    let builder = HANDLER_BUILDER_REGISTRY
        .get(kind)
        .ok_or_else(|| RouterError::Configuration(format!("Unknown handler kind '{kind}'")))?;
    builder(collaborators, options, role)
}

/// Deserializes handler options, treating an absent block as empty.
fn parse_options<T: DeserializeOwned + Default>(kind: &str, options: YamlValue) -> RouterResult<T> {
    if options.is_null() {
        return Ok(T::default());
    }
    serde_yaml::from_value(options)
        .map_err(|e| RouterError::Configuration(format!("Invalid {kind} handler options: {e}")))
}

fn reject_role(kind: &str, role: &Option<ExecutionRole>) -> RouterResult<()> {
    match role {
        Some(role) => Err(RouterError::Configuration(format!(
            "Handler '{kind}' does not accept execution role '{}'",
            role.name
        ))),
        None => Ok(()),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_unknown_kind() {
        let collab = collaborators(Default::default(), Default::default(), Default::default());
        let err = build_handler("gzip", &collab, YamlValue::Null, None).err().unwrap();
        assert!(matches!(err, RouterError::Configuration(_)));
    }

    #[test]
    fn test_role_rejected_outside_run_task() {
        let collab = collaborators(Default::default(), Default::default(), Default::default());
        let options: YamlValue = serde_yaml::from_str("listeners: [nginx]").unwrap();
        assert!(build_handler("endpoints", &collab, options, Some(role())).is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let collab = collaborators(Default::default(), Default::default(), Default::default());
        let options: YamlValue = serde_yaml::from_str("origin: nowhere").unwrap();
        assert!(build_handler("cache_aside", &collab, options, None).is_err());
    }
}
