use super::{from_redis_error, server_message, NodeAddr, NodeClient, Reply};
use crate::config::ConnectionConfig;
use crate::error::{KeyscopeError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Value};
use tracing::debug;

/// Client for a single node on a multiplexed `redis` connection.
///
/// Requests share one socket and every reply is routed back to the request
/// that sent it, so a call abandoned by a timeout leaves no stale reply
/// behind for the next one.
pub struct RedisNodeClient {
    addr: NodeAddr,
    connection: MultiplexedConnection,
}

impl RedisNodeClient {
    /// Open a connection and authenticate when credentials are configured
    pub async fn connect(addr: NodeAddr, config: &ConnectionConfig) -> Result<Self> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(addr.host.clone(), addr.port),
            redis: RedisConnectionInfo {
                db: 0,
                username: config.username.clone(),
                password: config.password.clone(),
            },
        };
        let client = redis::Client::open(info)?;

        let connection = tokio::time::timeout(
            config.connect_timeout(),
            client.get_multiplexed_tokio_connection(),
        )
        .await
        .map_err(|_| KeyscopeError::Timeout {
            node: addr.clone(),
            after: config.connect_timeout(),
        })??;

        debug!("Connected to {}", addr);
        Ok(Self { addr, connection })
    }
}

#[async_trait]
impl NodeClient for RedisNodeClient {
    fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    async fn send_command(&self, command: Cmd) -> Result<Value> {
        let mut connection = self.connection.clone();
        command
            .query_async(&mut connection)
            .await
            .map_err(from_redis_error)
    }

    /// Commands are queued on the shared connection together, so they go
    /// out back to back. Unlike `redis::pipe()`, one error reply does not
    /// fail the whole batch.
    async fn send_pipeline(&self, commands: Vec<Cmd>) -> Result<Vec<Reply>> {
        let replies = join_all(commands.iter().map(|command| {
            let mut connection = self.connection.clone();
            async move { command.query_async::<_, Value>(&mut connection).await }
        }))
        .await;

        replies
            .into_iter()
            .map(|reply| match reply {
                Ok(value) => Ok(Ok(value)),
                Err(err) => match server_message(&err) {
                    Some(message) => Ok(Err(message)),
                    None => Err(KeyscopeError::Redis(err)),
                },
            })
            .collect()
    }
}
