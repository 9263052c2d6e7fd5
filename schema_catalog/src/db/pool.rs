//! Pooled SQL Server clients
//!
//! sqlx has no SQL Server driver, so tiberius clients are pooled by bb8. A
//! client is validated on checkout and replaced when its connection broke,
//! including one abandoned halfway through a result stream.

use bb8::PooledConnection;
use bb8_tiberius::ConnectionManager;
use std::time::Duration;
use tiberius::Config;
use tracing::debug;

use crate::error::{Error, Result};

pub type TdsPool = bb8::Pool<ConnectionManager>;

/// A client checked out of the pool; returned on drop
pub type PooledClient = PooledConnection<'static, ConnectionManager>;

/// Pool of at most `size` clients; checkouts wait up to `timeout`
pub async fn build(config: Config, size: u32, timeout: Duration) -> Result<TdsPool> {
    debug!(size, "Building SQL Server connection pool");
    bb8::Pool::builder()
        .max_size(size.max(1))
        .connection_timeout(timeout)
        .test_on_check_out(true)
        .build(ConnectionManager::new(config))
        .await
        .map_err(|e| Error::Connection(e.to_string()))
}

pub async fn checkout(pool: &TdsPool) -> Result<PooledClient> {
    pool.get_owned()
        .await
        .map_err(|e| Error::Connection(format!("No pooled connection: {}", e)))
}
