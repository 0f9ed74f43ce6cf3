// src/proxy/mod.rs
mod backend;
mod pool;
mod proxy;
mod router;
mod sticky;

pub use backend::{Backend, BackendSnapshot, ConnectionGuard, HealthStatus};
pub use pool::{BackendPool, PoolError};
pub use proxy::{Proxy, ProxyError};
pub use router::{RouteRule, Router};
pub use sticky::{StickySessions, STICKY_COOKIE};
