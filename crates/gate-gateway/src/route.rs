//! Route classification

use gate_limits::AuthFlow;
use serde::{Deserialize, Serialize};

/// Limit class a request path falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    Login,
    PasswordReset,
    Api,
    Ai,
    /// Requires `Role::Admin`
    Admin,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::PasswordReset => "password_reset",
            Self::Api => "api",
            Self::Ai => "ai",
            Self::Admin => "admin",
        }
    }

    /// Authentication-sensitive routes get brute-force protection
    pub fn auth_flow(&self) -> Option<AuthFlow> {
        match self {
            Self::Login => Some(AuthFlow::Login),
            Self::PasswordReset => Some(AuthFlow::PasswordReset),
            Self::Api | Self::Ai | Self::Admin => None,
        }
    }
}

/// `[[routes]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    pub class: RouteClass,
}

impl RouteRule {
    pub fn new(prefix: &str, class: RouteClass) -> Self {
        Self {
            prefix: prefix.to_string(),
            class,
        }
    }
}

/// Routes used when none are configured
pub fn default_routes() -> Vec<RouteRule> {
    vec![
        RouteRule::new("/api/auth/login", RouteClass::Login),
        RouteRule::new("/api/auth/password-reset", RouteClass::PasswordReset),
        RouteRule::new("/api/ai", RouteClass::Ai),
        RouteRule::new("/api/admin", RouteClass::Admin),
    ]
}

/// Longest-prefix classifier; unmatched paths are `Api`
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(mut rules: Vec<RouteRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { rules }
    }

    pub fn classify(&self, path: &str) -> RouteClass {
        self.rules
            .iter()
            .find(|rule| matches_prefix(path, &rule.prefix))
            .map(|rule| rule.class)
            .unwrap_or(RouteClass::Api)
    }
}

/// Prefix match on segment boundaries (`/api/ai` does not match `/api/aid`)
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}
