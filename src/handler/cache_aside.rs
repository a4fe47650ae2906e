//! Cache-aside page handler.
//!
//! Every instance shares the single cache key [`PAGE_KEY`], so two routes
//! pointed at different origins overwrite each other's cached page.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use crate::{
    backend::{
        cache::CacheStore, origin::OriginClient, task::ExecutionRole, EndpointResolver,
        ListenerEndpoint, Scheme,
    },
    core::{RouterError, RouterResult},
    metrics::CACHE_LOOKUPS,
    router::{envelope::X_POWERED_BY, Request, ResponseEnvelope},
};

use super::{parse_options, reject_role, Collaborators, RouteHandler};

pub const HANDLER_NAME: &str = "cache_aside";

pub const PAGE_KEY: &str = "page";

const CACHE_POWERED_BY: &str = "redis";

#[derive(Default, Debug, Serialize, Deserialize)]
struct HandlerConfig {
    origin: String,
    /// `X-Powered-By` on origin-served responses, defaults to the origin name.
    powered_by: Option<String>,
    /// Consult the cache before the origin.
    #[serde(default = "HandlerConfig::default_lookup")]
    lookup: bool,
}

impl HandlerConfig {
    fn default_lookup() -> bool {
        true
    }
}

pub struct CacheAsideHandler {
    origin: ListenerEndpoint,
    scheme: Scheme,
    powered_by: HeaderValue,
    lookup: bool,
    cache: Arc<dyn CacheStore>,
    client: Arc<dyn OriginClient>,
}

pub fn create_cache_aside_handler(
    collaborators: &Collaborators,
    cfg: YamlValue,
    role: Option<ExecutionRole>,
) -> RouterResult<Arc<dyn RouteHandler>> {
    reject_role(HANDLER_NAME, &role)?;
    let config: HandlerConfig = parse_options(HANDLER_NAME, cfg)?;
    if config.origin.is_empty() {
        return Err(RouterError::Configuration(
            "cache_aside handler requires an origin".to_string(),
        ));
    }

    let (origin, scheme) = collaborators.listener(&config.origin)?;
    let cache = collaborators.cache.clone().ok_or_else(|| {
        RouterError::Configuration("cache_aside handler requires a cache".to_string())
    })?;
    let powered_by = HeaderValue::from_str(config.powered_by.as_deref().unwrap_or(&config.origin))
        .map_err(|e| RouterError::Configuration(format!("Invalid powered_by value: {e}")))?;

    Ok(Arc::new(CacheAsideHandler {
        origin,
        scheme,
        powered_by,
        lookup: config.lookup,
        cache,
        client: collaborators.origin.clone(),
    }))
}

#[async_trait]
impl RouteHandler for CacheAsideHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    async fn serve(&self, _request: &Request) -> RouterResult<ResponseEnvelope> {
        let origin = self.origin.name();

        if self.lookup {
            // An empty cached page counts as a miss.
            match self.cache.get(PAGE_KEY).await? {
                Some(page) if !page.is_empty() => {
                    log::debug!("Serving '{PAGE_KEY}' from cache");
                    CACHE_LOOKUPS.with_label_values(&[origin, "hit"]).inc();
                    return Ok(ResponseEnvelope::ok(page)
                        .with_header(X_POWERED_BY, HeaderValue::from_static(CACHE_POWERED_BY)));
                }
                _ => CACHE_LOOKUPS.with_label_values(&[origin, "miss"]).inc(),
            }
        }

        let endpoint = self.origin.resolve()?;
        log::info!("Got host and port for '{origin}': {endpoint}");

        let body = self.client.fetch(origin, self.scheme, &endpoint).await?;
        let page = String::from_utf8_lossy(&body).into_owned();

        self.cache.set(PAGE_KEY, &page).await?;

        Ok(ResponseEnvelope::ok(page).with_header(X_POWERED_BY, self.powered_by.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use bytes::Bytes;
    use http::Method;

    use super::*;
    use crate::handler::testing::*;

    fn build(collab: &Collaborators, options: &str) -> Arc<dyn RouteHandler> {
        let cfg = serde_yaml::from_str(options).unwrap();
        create_cache_aside_handler(collab, cfg, None).unwrap_or_else(|e| panic!("{e}"))
    }

    fn get(path: &str) -> Request {
        Request::new(Method::GET, path)
    }

    #[tokio::test]
    async fn test_cache_hit_skips_origin() {
        let origin = Arc::new(StaticOrigin::page("nginx-lb", "from nginx"));
        let cache = Arc::new(MemoryCache::with(PAGE_KEY, "cached page"));
        let collab = collaborators(origin.clone(), cache.clone(), Default::default());

        let resp = build(&collab, "origin: nginx").serve(&get("/")).await.unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"cached page");
        assert_eq!(resp.header_str("x-powered-by"), Some("redis"));
        assert_eq!(origin.call_count(), 0);
        assert_eq!(cache.sets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_miss_backfills_cache() {
        let origin = Arc::new(StaticOrigin::page("nginx-lb", "from nginx"));
        let cache = Arc::new(MemoryCache::default());
        let collab = collaborators(origin.clone(), cache.clone(), Default::default());

        let resp = build(&collab, "origin: nginx").serve(&get("/")).await.unwrap();

        assert_eq!(&resp.body[..], b"from nginx");
        assert_eq!(resp.header_str("x-powered-by"), Some("nginx"));
        assert_eq!(origin.call_count(), 1);
        assert_eq!(cache.value(PAGE_KEY).as_deref(), Some("from nginx"));
    }

    #[tokio::test]
    async fn test_empty_cached_page_is_a_miss() {
        let origin = Arc::new(StaticOrigin::page("nginx-lb", "fresh"));
        let cache = Arc::new(MemoryCache::with(PAGE_KEY, ""));
        let collab = collaborators(origin.clone(), cache.clone(), Default::default());

        let resp = build(&collab, "origin: nginx").serve(&get("/")).await.unwrap();

        assert_eq!(&resp.body[..], b"fresh");
        assert_eq!(origin.call_count(), 1);
        assert_eq!(cache.value(PAGE_KEY).as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_origin_failure_leaves_cache_untouched() {
        let origin = Arc::new(StaticOrigin {
            fail: true,
            ..Default::default()
        });
        let cache = Arc::new(MemoryCache::default());
        let collab = collaborators(origin.clone(), cache.clone(), Default::default());

        let err = build(&collab, "origin: nginx").serve(&get("/")).await.unwrap_err();

        assert_eq!(err.name(), "UpstreamUnavailable");
        assert_eq!(cache.sets.load(Ordering::SeqCst), 0);
        assert!(cache.value(PAGE_KEY).is_none());
    }

    #[tokio::test]
    async fn test_non_utf8_page_is_served_and_cached() {
        let mut origin = StaticOrigin::default();
        origin
            .pages
            .insert("nginx-lb".into(), Bytes::from_static(b"<p>caf\xe9</p>"));
        let origin = Arc::new(origin);
        let cache = Arc::new(MemoryCache::default());
        let collab = collaborators(origin, cache.clone(), Default::default());

        let resp = build(&collab, "origin: nginx").serve(&get("/")).await.unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], "<p>caf\u{FFFD}</p>".as_bytes());
        assert_eq!(cache.value(PAGE_KEY).as_deref(), Some("<p>caf\u{FFFD}</p>"));
    }

    #[tokio::test]
    async fn test_cache_failure_surfaces() {
        let origin = Arc::new(StaticOrigin::page("nginx-lb", "from nginx"));
        let cache = Arc::new(MemoryCache {
            fail: true,
            ..Default::default()
        });
        let collab = collaborators(origin.clone(), cache, Default::default());

        let err = build(&collab, "origin: nginx").serve(&get("/")).await.unwrap_err();
        assert_eq!(err.to_fields()["upstream"], "mycache");
        assert_eq!(origin.call_count(), 0);
    }

    #[tokio::test]
    async fn test_write_only_variant_shares_the_key() {
        let mut origin = StaticOrigin::page("nginx-lb", "from nginx");
        origin.pages.insert("custom-lb".into(), "Hello, world!".into());
        let origin = Arc::new(origin);
        let cache = Arc::new(MemoryCache::with(PAGE_KEY, "from nginx"));
        let collab = collaborators(origin.clone(), cache.clone(), Default::default());

        let custom = build(
            &collab,
            "{origin: custom, powered_by: custom web server, lookup: false}",
        );
        let resp = custom.serve(&get("/custom")).await.unwrap();

        assert_eq!(&resp.body[..], b"Hello, world!");
        assert_eq!(resp.header_str("x-powered-by"), Some("custom web server"));
        assert_eq!(cache.gets.load(Ordering::SeqCst), 0);
        assert_eq!(cache.value(PAGE_KEY).as_deref(), Some("Hello, world!"));

        // The read-through route now serves the custom page from cache.
        let resp = build(&collab, "origin: nginx").serve(&get("/")).await.unwrap();
        assert_eq!(&resp.body[..], b"Hello, world!");
        assert_eq!(resp.header_str("x-powered-by"), Some("redis"));
    }

    #[tokio::test]
    async fn test_origin_endpoint_resolved_per_request() {
        let mut origin = StaticOrigin::page("nginx-lb", "one");
        origin.pages.insert("nginx-lb-2".into(), "two".into());
        let origin = Arc::new(origin);
        let collab = collaborators(origin.clone(), Default::default(), Default::default());
        let handler = build(&collab, "{origin: nginx, lookup: false}");

        handler.serve(&get("/")).await.unwrap();
        collab
            .listeners
            .set("nginx", crate::backend::Endpoint::new("nginx-lb-2", 80));
        let resp = handler.serve(&get("/")).await.unwrap();

        assert_eq!(&resp.body[..], b"two");
        let calls = origin.calls.lock().unwrap();
        assert_eq!(calls[0].hostname, "nginx-lb");
        assert_eq!(calls[1].hostname, "nginx-lb-2");
    }

    #[test]
    fn test_requires_cache() {
        let mut collab = collaborators(Default::default(), Default::default(), Default::default());
        collab.cache = None;
        let cfg = serde_yaml::from_str("origin: nginx").unwrap();
        assert!(create_cache_aside_handler(&collab, cfg, None).is_err());
    }
}
