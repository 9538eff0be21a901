use thiserror::Error;

/// Marketplace client error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanalProError {
    /// The access token (or login) was rejected. Never retried by the client.
    #[error("marketplace rejected credentials: {0}")]
    Unauthorized(String),

    /// The GraphQL layer returned `errors[]`.
    #[error("graphql error: {0}")]
    GraphQl(String),

    #[error("listing not found: {0}")]
    NotFound(String),

    #[error("rate limited by marketplace")]
    RateLimited,

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection, timeout or TLS failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl CanalProError {
    /// Whether the same request may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            CanalProError::Transport(_) | CanalProError::RateLimited => true,
            CanalProError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CanalProError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for CanalProError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CanalProError::Decode(e.to_string())
        } else {
            CanalProError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CanalProError::Transport("reset".into()).is_transient());
        assert!(CanalProError::RateLimited.is_transient());
        assert!(CanalProError::Http { status: 503, body: String::new() }.is_transient());
        assert!(!CanalProError::Http { status: 400, body: String::new() }.is_transient());
        assert!(!CanalProError::Unauthorized("expired".into()).is_transient());
        assert!(!CanalProError::GraphQl("bad input".into()).is_transient());
    }
}
