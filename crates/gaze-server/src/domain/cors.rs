//! Cross-origin policy for the WebSocket handshake.
//!
//! Browsers attach an `Origin` header to the WebSocket upgrade request but do
//! not enforce CORS on it; the server has to.  The default policy is fully
//! open (any origin, `GET`/`POST`, `Content-Type`/`Authorization`) so camera
//! pages served from anywhere can connect.  Operators can narrow the origin
//! list through configuration.

/// Origin wildcard accepted in `allowed_origins`.
pub const ANY_ORIGIN: &str = "*";

/// Which cross-origin callers may open a session, and which CORS headers are
/// advertised on the upgrade response.
#[derive(Debug, Clone, PartialEq)]
pub struct CorsPolicy {
    /// Exact origins (e.g. `https://app.example.com`) or `"*"`.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allowed_origins: vec![ANY_ORIGIN.to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
        }
    }
}

impl CorsPolicy {
    /// Builds the default policy restricted to `origins`.
    ///
    /// An empty list keeps the wildcard.
    pub fn with_origins(origins: Vec<String>) -> Self {
        if origins.is_empty() {
            return Self::default();
        }
        Self {
            allowed_origins: origins,
            ..Self::default()
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == ANY_ORIGIN)
    }

    /// Whether a handshake carrying `origin` may proceed.
    ///
    /// Requests without an `Origin` header (native clients, curl) are not
    /// cross-origin and are always allowed.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.allows_any_origin() => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin)),
        }
    }

    /// CORS response headers for a request from `origin`.
    ///
    /// Only call after [`allows`](Self::allows) returned `true`.
    pub fn response_headers(&self, origin: Option<&str>) -> Vec<(&'static str, String)> {
        let allow_origin = match origin {
            Some(origin) if !self.allows_any_origin() => origin.to_string(),
            _ => ANY_ORIGIN.to_string(),
        };
        vec![
            ("Access-Control-Allow-Origin", allow_origin),
            ("Access-Control-Allow-Methods", self.allowed_methods.join(", ")),
            ("Access-Control-Allow-Headers", self.allowed_headers.join(", ")),
        ]
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
