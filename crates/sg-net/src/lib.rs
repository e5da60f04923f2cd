pub mod error;
pub mod pool;
pub mod upstream;

pub use error::{NetError, NetReason, NetResult};
pub use pool::{PooledConn, RedisPool, RedisPoolConfig};
pub use upstream::{Strategy, Upstream, UpstreamPool};
