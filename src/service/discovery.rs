use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use hickory_resolver::TokioAsyncResolver;
use once_cell::sync::OnceCell;
use pingora_error::{ErrorType::InternalError, OkOrErr, OrErr, Result};

use crate::backend::Endpoint;

static GLOBAL_RESOLVER: OnceCell<Arc<TokioAsyncResolver>> = OnceCell::new();

fn get_global_resolver() -> Result<Arc<TokioAsyncResolver>> {
    GLOBAL_RESOLVER
        .get_or_try_init(|| TokioAsyncResolver::tokio_from_system_conf().map(Arc::new))
        .or_err(InternalError, "Failed to load system DNS configuration")
        .cloned()
}

/// Resolves an endpoint to a socket address.
///
/// IP literals are used as-is; names are looked up on every call and the
/// first address wins.
pub async fn resolve_socket_addr(endpoint: &Endpoint) -> Result<SocketAddr> {
    if let Some(ip) = parse_ip(&endpoint.hostname) {
        return Ok(SocketAddr::new(ip, endpoint.port));
    }

    let name = endpoint.hostname.as_str();
    log::debug!("Resolving DNS for domain: {}", name);

    let lookup = get_global_resolver()?
        .lookup_ip(name)
        .await
        .or_err_with(InternalError, || format!("Dns lookup failed for domain {name}"))?;

    lookup
        .iter()
        .next()
        .map(|ip| SocketAddr::new(ip, endpoint.port))
        .or_err_with(InternalError, || format!("No address found for domain {name}"))
}

fn parse_ip(hostname: &str) -> Option<IpAddr> {
    hostname
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}
