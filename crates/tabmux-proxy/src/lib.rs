//! Proxy descriptor resolution and CONNECT-style tunnel establishment.

pub mod resolver;
pub mod tunnel;

pub use resolver::{ProxyResolver, ResolvedProxy};
pub use tunnel::{open_tunnel, TunnelError};
