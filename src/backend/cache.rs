use async_trait::async_trait;
use redis::{
    aio::MultiplexedConnection, AsyncCommands, Client, ConnectionAddr, ConnectionInfo,
    RedisConnectionInfo,
};

use crate::core::{RouterError, RouterResult};

use super::{Endpoint, EndpointResolver, ListenerEndpoint};

/// Key/value store shared by every router instance.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> RouterResult<Option<String>>;

    /// Completes only once the store acknowledged the write.
    async fn set(&self, key: &str, value: &str) -> RouterResult<()>;
}

/// Redis cache reached at a runtime-resolved listener endpoint.
///
/// Every operation resolves the endpoint and opens its own connection, so an
/// endpoint moved through the admin API is picked up by the next call.
pub struct RedisCache {
    endpoint: ListenerEndpoint,
    password: Option<String>,
}

impl RedisCache {
    pub fn new(endpoint: ListenerEndpoint, password: Option<String>) -> Self {
        Self { endpoint, password }
    }

    fn connection_info(&self, endpoint: &Endpoint) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(endpoint.hostname.clone(), endpoint.port),
            redis: RedisConnectionInfo {
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }

    /// Connects and authenticates. A rejected password fails here.
    async fn connect(&self) -> RouterResult<(MultiplexedConnection, Endpoint)> {
        let endpoint = self.endpoint.resolve()?;
        log::debug!("Cache endpoint: {endpoint}");

        let conn = Client::open(self.connection_info(&endpoint))
            .map_err(|e| self.unavailable(e, &endpoint))?
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| self.unavailable(e, &endpoint))?;

        Ok((conn, endpoint))
    }

    fn unavailable(&self, detail: impl std::fmt::Display, endpoint: &Endpoint) -> RouterError {
        RouterError::upstream(self.endpoint.name(), detail).at(endpoint)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> RouterResult<Option<String>> {
        let (mut conn, endpoint) = self.connect().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| self.unavailable(e, &endpoint))?;

        // Stored pages are text; undecodable bytes are replaced, not rejected.
        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    async fn set(&self, key: &str, value: &str) -> RouterResult<()> {
        let (mut conn, endpoint) = self.connect().await?;
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| self.unavailable(e, &endpoint))
    }
}
