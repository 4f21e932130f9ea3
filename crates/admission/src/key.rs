//! Rate limit key derivation.
//!
//! A key is composed from zero or more components (caller address,
//! authenticated user, method + path), joined with `|`. A caller-supplied
//! function overrides composition entirely. With no component selected every
//! caller shares the single `global` key.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

/// Key used when no component is selected.
pub const GLOBAL_KEY: &str = "global";

/// Caller-supplied key function.
pub type KeyFn = Arc<dyn Fn(&KeyContext) -> String + Send + Sync>;

/// Request attributes available for key derivation.
#[derive(Debug, Clone, Default)]
pub struct KeyContext {
    pub remote_addr: Option<IpAddr>,
    pub user_id: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
}

/// Unknown component name in a strategy list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown rate limit key component: {0}")]
pub struct UnknownKeyComponent(pub String);

/// Which request attributes form the key.
#[derive(Clone, Default)]
pub struct KeyStrategy {
    by_ip: bool,
    by_user: bool,
    by_endpoint: bool,
    custom: Option<KeyFn>,
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStrategy")
            .field("by_ip", &self.by_ip)
            .field("by_user", &self.by_user)
            .field("by_endpoint", &self.by_endpoint)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl KeyStrategy {
    /// Every caller shares one key.
    #[must_use]
    pub fn global() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn by_ip(mut self) -> Self {
        self.by_ip = true;
        self
    }

    #[must_use]
    pub fn by_user(mut self) -> Self {
        self.by_user = true;
        self
    }

    #[must_use]
    pub fn by_endpoint(mut self) -> Self {
        self.by_endpoint = true;
        self
    }

    /// Replace composition with `f`.
    #[must_use]
    pub fn custom<F>(mut self, f: F) -> Self
    where
        F: Fn(&KeyContext) -> String + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(f));
        self
    }

    /// Parse a comma-separated list of `ip`, `user`, `endpoint`, `global`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownKeyComponent` for any other entry.
    pub fn parse(list: &str) -> Result<Self, UnknownKeyComponent> {
        let mut strategy = Self::global();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            strategy = match part.to_ascii_lowercase().as_str() {
                "ip" => strategy.by_ip(),
                "user" => strategy.by_user(),
                "endpoint" => strategy.by_endpoint(),
                "global" => strategy,
                other => return Err(UnknownKeyComponent(other.to_string())),
            };
        }
        Ok(strategy)
    }

    /// Derive the key for a request.
    #[must_use]
    pub fn derive(&self, ctx: &KeyContext) -> String {
        if let Some(custom) = &self.custom {
            return custom(ctx);
        }

        let mut parts: Vec<String> = Vec::with_capacity(3);

        if self.by_ip {
            match ctx.remote_addr {
                Some(addr) => parts.push(format!("ip:{addr}")),
                None => parts.push("ip:unknown".to_string()),
            }
        }

        if self.by_user {
            match ctx.user_id.as_deref() {
                Some(user) => parts.push(format!("user:{user}")),
                None => parts.push("user:anonymous".to_string()),
            }
        }

        if self.by_endpoint {
            let method = ctx.method.as_deref().unwrap_or("ANY");
            let path = ctx.path.as_deref().unwrap_or("/");
            parts.push(format!("endpoint:{method}:{path}"));
        }

        if parts.is_empty() {
            GLOBAL_KEY.to_string()
        } else {
            parts.join("|")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ctx() -> KeyContext {
        KeyContext {
            remote_addr: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
            user_id: Some("user-1".to_string()),
            method: Some("GET".to_string()),
            path: Some("/ws".to_string()),
        }
    }

    #[test]
    fn test_no_components_uses_global_key() {
        assert_eq!(KeyStrategy::global().derive(&ctx()), "global");
    }

    #[test]
    fn test_single_components() {
        assert_eq!(KeyStrategy::global().by_ip().derive(&ctx()), "ip:10.0.0.7");
        assert_eq!(KeyStrategy::global().by_user().derive(&ctx()), "user:user-1");
        assert_eq!(
            KeyStrategy::global().by_endpoint().derive(&ctx()),
            "endpoint:GET:/ws"
        );
    }

    #[test]
    fn test_composed_components() {
        let strategy = KeyStrategy::global().by_ip().by_user().by_endpoint();
        assert_eq!(
            strategy.derive(&ctx()),
            "ip:10.0.0.7|user:user-1|endpoint:GET:/ws"
        );
    }

    #[test]
    fn test_missing_attributes_have_placeholders() {
        let strategy = KeyStrategy::global().by_ip().by_user();
        assert_eq!(
            strategy.derive(&KeyContext::default()),
            "ip:unknown|user:anonymous"
        );
    }

    #[test]
    fn test_custom_function_overrides_components() {
        let strategy = KeyStrategy::global()
            .by_ip()
            .custom(|ctx| format!("tenant:{}", ctx.user_id.as_deref().unwrap_or("none")));
        assert_eq!(strategy.derive(&ctx()), "tenant:user-1");
    }

    #[test]
    fn test_parse() {
        let strategy = KeyStrategy::parse("ip, user").unwrap();
        assert_eq!(strategy.derive(&ctx()), "ip:10.0.0.7|user:user-1");

        let strategy = KeyStrategy::parse("global").unwrap();
        assert_eq!(strategy.derive(&ctx()), "global");

        let strategy = KeyStrategy::parse("").unwrap();
        assert_eq!(strategy.derive(&ctx()), "global");
    }

    #[test]
    fn test_parse_rejects_unknown_component() {
        let err = KeyStrategy::parse("ip,tenant").unwrap_err();
        assert_eq!(err, UnknownKeyComponent("tenant".to_string()));
    }
}
