//! Resolves a [`ProxyPolicy`] against the process-wide default and produces
//! a [`ResolvedProxy`] descriptor: `UseDefault` resolves against the
//! process-wide default, `Explicit` is used verbatim, `None` yields no
//! proxy.

use tabmux_core::model::{ProxyAuth, ProxyKind, ProxyPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProxy {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub auth: Option<ProxyAuth>,
}

impl ResolvedProxy {
    fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProxyResolver {
    default: Option<ResolvedProxy>,
}

impl ProxyResolver {
    pub fn new() -> Self {
        Self { default: None }
    }

    pub fn set_default(&mut self, proxy: Option<ResolvedProxy>) {
        self.default = proxy;
    }

    /// Resolve a policy to either `None` (connect directly) or a validated
    /// descriptor. An invalid explicit descriptor (empty host or port 0)
    /// falls through to direct rather than erroring.
    pub fn resolve(&self, policy: &ProxyPolicy) -> Option<ResolvedProxy> {
        let candidate = match policy {
            ProxyPolicy::None => return None,
            ProxyPolicy::UseDefault => self.default.clone(),
            ProxyPolicy::Explicit { kind, host, port, auth } => Some(ResolvedProxy {
                kind: kind.clone(),
                host: host.clone(),
                port: *port,
                auth: auth.clone(),
            }),
        };

        candidate.filter(ResolvedProxy::is_valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_policy_yields_no_proxy() {
        let resolver = ProxyResolver::new();
        assert_eq!(resolver.resolve(&ProxyPolicy::None), None);
    }

    #[test]
    fn use_default_with_no_default_set_yields_no_proxy() {
        let resolver = ProxyResolver::new();
        assert_eq!(resolver.resolve(&ProxyPolicy::UseDefault), None);
    }

    #[test]
    fn use_default_resolves_to_configured_default() {
        let mut resolver = ProxyResolver::new();
        let default = ResolvedProxy {
            kind: ProxyKind::Socks5,
            host: "proxy.internal".into(),
            port: 1080,
            auth: None,
        };
        resolver.set_default(Some(default.clone()));
        assert_eq!(resolver.resolve(&ProxyPolicy::UseDefault), Some(default));
    }

    #[test]
    fn explicit_policy_used_verbatim() {
        let resolver = ProxyResolver::new();
        let policy = ProxyPolicy::Explicit {
            kind: ProxyKind::Http,
            host: "proxy.example.com".into(),
            port: 8080,
            auth: Some(ProxyAuth { username: "u".into(), password: "p".into() }),
        };
        let resolved = resolver.resolve(&policy).unwrap();
        assert_eq!(resolved.host, "proxy.example.com");
        assert_eq!(resolved.port, 8080);
    }

    #[test]
    fn invalid_explicit_descriptor_falls_through_to_direct() {
        let resolver = ProxyResolver::new();
        let policy = ProxyPolicy::Explicit {
            kind: ProxyKind::Http,
            host: String::new(),
            port: 8080,
            auth: None,
        };
        assert_eq!(resolver.resolve(&policy), None);
    }
}
