//! Handshake details for an accepted connection.

// ============================================================================
// Imports
// ============================================================================

use tokio_tungstenite::tungstenite::handshake::server::Request as HandshakeRequest;

// ============================================================================
// ConnectionInfo
// ============================================================================

/// Information provided by the client during the opening handshake.
///
/// Useful for deriving connection IDs or authenticating clients from
/// headers and cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Remote endpoint in `host:port` form.
    pub remote_endpoint: Option<String>,
    /// Path of the URL used to connect.
    pub path: Option<String>,
    /// Request headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Cookies from the `Cookie` header(s).
    pub cookies: Vec<(String, String)>,
}

impl ConnectionInfo {
    /// Creates empty connection info.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote endpoint.
    #[inline]
    #[must_use]
    pub fn with_remote_endpoint(mut self, remote_endpoint: impl Into<String>) -> Self {
        self.remote_endpoint = Some(remote_endpoint.into());
        self
    }

    /// Sets the path.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Adds a header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a cookie.
    #[inline]
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Returns the first header named `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the first cookie named `name`.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Captures the upgrade request of a server-side handshake.
    pub(crate) fn from_handshake(remote_endpoint: String, request: &HandshakeRequest) -> Self {
        let mut info = Self::new()
            .with_remote_endpoint(remote_endpoint)
            .with_path(request.uri().path());

        for (name, value) in request.headers() {
            // Non-UTF-8 header values cannot be represented; skip them.
            let Ok(value) = value.to_str() else {
                continue;
            };
            if name.as_str().eq_ignore_ascii_case("cookie") {
                info.cookies.extend(parse_cookies(value));
            }
            info.headers.push((name.as_str().to_string(), value.to_string()));
        }

        info
    }
}

/// Parses a `Cookie` header value into name/value pairs.
///
/// Values are percent-decoded when possible.
fn parse_cookies(header: &str) -> impl Iterator<Item = (String, String)> + '_ {
    header.split(';').filter_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let value = value.trim().trim_matches('"');
        let value = urlencoding::decode(value)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| value.to_string());
        Some((name.to_string(), value))
    })
}

// ============================================================================
// Tests
// ============================================================================
