use serde::{Deserialize, Serialize};

/// The secondary proxy that's used for tunneled destinations.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct TunnelEndpoint {
    pub host: String,
    pub port: u16,
}

impl TunnelEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The routing rules of the selective proxy.
///
/// Destinations whose hostname contains one of `domains` are sent through the tunnel.
/// Everything else is connected directly, with a single fallback to the tunnel if the
/// destination's name cannot be resolved.
#[derive(PartialEq, Eq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct RouteTable {
    /// If this is false, the tunnel is never used and every destination is connected directly.
    pub enabled: bool,
    pub tunnel: Option<TunnelEndpoint>,
    /// Ordered list of domain substrings that require the tunnel.
    #[serde(default)]
    pub domains: Vec<String>,
}

/// The route a single connection takes.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Route {
    Direct,
    Tunnel(TunnelEndpoint),
}

impl RouteTable {
    /// Return the tunnel endpoint, if tunneling is currently possible at all.
    pub fn tunnel(&self) -> Option<&TunnelEndpoint> {
        if !self.enabled {
            return None;
        }
        self.tunnel.as_ref()
    }

    /// The first matching domain rule for this host, if any.
    pub fn matching_rule(&self, host: &str) -> Option<&str> {
        let host = host.to_ascii_lowercase();
        self.domains
            .iter()
            .find(|domain| !domain.is_empty() && host.contains(&domain.to_ascii_lowercase()))
            .map(String::as_str)
    }

    /// Decide how a connection to `host` is routed.
    pub fn route(&self, host: &str) -> Route {
        match self.tunnel() {
            Some(endpoint) if self.matching_rule(host).is_some() => Route::Tunnel(endpoint.clone()),
            _ => Route::Direct,
        }
    }

    /// The route that's used after a direct connection failed to resolve its destination.
    pub fn fallback(&self) -> Option<Route> {
        self.tunnel().map(|endpoint| Route::Tunnel(endpoint.clone()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn table() -> RouteTable {
        RouteTable {
            enabled: true,
            tunnel: Some(TunnelEndpoint {
                host: "10.0.0.1".into(),
                port: 3128,
            }),
            domains: vec!["corp.example".into(), "intranet".into()],
        }
    }

    #[test]
    fn substring_match_is_tunneled() {
        let table = table();
        assert!(matches!(table.route("login.corp.example.com"), Route::Tunnel(_)));
        assert!(matches!(table.route("INTRANET.local"), Route::Tunnel(_)));
        assert_eq!(table.route("example.org"), Route::Direct);
    }

    #[test]
    fn disabled_table_never_tunnels() {
        let mut table = table();
        table.enabled = false;
        assert_eq!(table.route("login.corp.example.com"), Route::Direct);
        assert_eq!(table.fallback(), None);
    }

    #[test]
    fn fallback_requires_endpoint() {
        let mut table = table();
        assert!(table.fallback().is_some());
        table.tunnel = None;
        assert_eq!(table.fallback(), None);
        assert_eq!(table.route("login.corp.example.com"), Route::Direct);
    }
}
