use anyhow::anyhow;
use async_trait::async_trait;

/// Resolves a bearer credential to a verified user id.
///
/// Token issuance and verification live outside this service; the core just
/// trusts whatever identity this seam hands back.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, bearer: &str) -> anyhow::Result<i64>;
}

/// Trusts the gateway in front of the service: the bearer subject is already
/// a verified user id, forwarded as-is.
pub struct GatewayIdentity;

#[async_trait]
impl Authenticator for GatewayIdentity {
    async fn verify(&self, bearer: &str) -> anyhow::Result<i64> {
        bearer
            .trim()
            .parse::<i64>()
            .map_err(|_| anyhow!("unrecognized credential"))
    }
}
