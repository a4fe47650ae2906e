//! Backing services the router talks to.
//!
//! Each backing listener is known by name. Its network identity lives in the
//! [`ListenerRegistry`] and may change at any time (the admin API rewrites
//! it), so consumers hold a [`ListenerEndpoint`] accessor and resolve it on
//! every call instead of keeping an [`Endpoint`] around.

pub mod cache;
pub mod origin;
pub mod task;

use std::{collections::BTreeMap, fmt, sync::Arc};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::{RouterError, RouterResult};

/// A (hostname, port) pair identifying a reachable service instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Endpoint {
    #[validate(length(min = 1))]
    pub hostname: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Endpoint {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.hostname.contains(':') && !self.hostname.starts_with('[') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Resolves the current endpoint of a backing listener.
///
/// Implementations must not memoize: two calls may legitimately return
/// different values.
pub trait EndpointResolver: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(&self) -> RouterResult<Endpoint>;
}

/// Runtime table of backing listener endpoints.
#[derive(Default)]
pub struct ListenerRegistry {
    endpoints: DashMap<String, Endpoint>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Endpoint> {
        self.endpoints.get(name).map(|e| e.value().clone())
    }

    /// Inserts or replaces a listener endpoint, returning the previous one.
    pub fn set(&self, name: impl Into<String>, endpoint: Endpoint) -> Option<Endpoint> {
        let name = name.into();
        log::info!("Listener '{name}' now at {endpoint}");
        self.endpoints.insert(name, endpoint)
    }

    pub fn remove(&self, name: &str) -> Option<Endpoint> {
        self.endpoints.remove(name).map(|(_, endpoint)| endpoint)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// Sorted snapshot of every listener, for diagnostics.
    pub fn snapshot(&self) -> BTreeMap<String, Endpoint> {
        self.endpoints
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Returns an accessor bound to `name`.
    pub fn endpoint(self: &Arc<Self>, name: impl Into<String>) -> ListenerEndpoint {
        ListenerEndpoint {
            name: name.into(),
            registry: self.clone(),
        }
    }
}

/// Accessor for one named listener. Cheap to clone.
#[derive(Clone)]
pub struct ListenerEndpoint {
    name: String,
    registry: Arc<ListenerRegistry>,
}

impl EndpointResolver for ListenerEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self) -> RouterResult<Endpoint> {
        self.registry
            .get(&self.name)
            .ok_or_else(|| RouterError::EndpointUnresolved {
                listener: self.name.clone(),
            })
    }
}

/// Transport scheme of a backing listener.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    HTTP,
    HTTPS,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::HTTP => "http",
            Scheme::HTTPS => "https",
        }
    }

    pub fn url(&self, endpoint: &Endpoint, path: &str) -> String {
        format!("{}://{}{}", self.as_str(), endpoint.authority(), path)
    }
}
