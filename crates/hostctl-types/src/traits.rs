#![allow(missing_docs)]
use async_trait::async_trait;
use serde::{Serialize, Deserialize};

//─────────────────────────────
//  Capability primitives
//─────────────────────────────

/// Canonical claim set embedded in every internal service-to-service
/// capability token (e.g. a resource workflow calling a node-agent, or the
/// CLI bootstrapping a worker pool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject – the calling service or workflow identity.
    pub sub: String,
    /// Cluster the subject is scoped to.
    pub cluster: String,
    /// Ordered list of permission strings (e.g. "node.write", "db.write").
    pub permissions: Vec<String>,
    /// Issued-at timestamp (seconds since Unix epoch).
    pub iat: u64,
    /// Expiry timestamp (seconds since Unix epoch, must be > `iat`).
    pub exp: u64,
    /// Unique token identifier for replay protection.
    pub jti: String,
}

/// Maximum allowed token lifetime in seconds (24h).
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 86_400;
/// Maximum permission entries per token.
pub const MAX_PERMISSIONS_COUNT: usize = 100;

/// Simple error type used by capability validation logic.
#[derive(Debug)]
pub struct CapabilityError(pub String);

impl std::fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for CapabilityError {}

/// Convenience result alias for capability-related functions.
pub type CapResult<T> = std::result::Result<T, CapabilityError>;

impl Claims {
    /// Perform semantic validation of the claim set.
    pub fn validate(&self) -> CapResult<()> {
        if self.sub.trim().is_empty() || self.sub.len() > 256 {
            return Err(CapabilityError("invalid subject identifier".into()));
        }
        if self.cluster.trim().is_empty() || self.cluster.len() > 256 {
            return Err(CapabilityError("invalid cluster identifier".into()));
        }
        if self.permissions.len() > MAX_PERMISSIONS_COUNT {
            return Err(CapabilityError("too many permissions".into()));
        }
        if self.exp <= self.iat || self.exp - self.iat > MAX_TOKEN_LIFETIME_SECS {
            return Err(CapabilityError("invalid token lifetime".into()));
        }
        Ok(())
    }
}

/// Capability token trait implemented by concrete formats (JWT today).
#[async_trait]
pub trait CapabilityToken: Sized + Send + Sync {
    async fn mint(claims: &Claims, key: &[u8]) -> CapResult<Self>;
    fn as_str(&self) -> &str;
}

/// Validator trait used by the engine's dispatch boundary.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, raw: &str) -> CapResult<Claims>;
}
