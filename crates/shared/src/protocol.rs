//! Wire-level constants and the bearer credential consumed at connect time.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};

use crate::error::NotifyError;

/// Personal notification queue.
pub const DEST_NOTIFICATIONS: &str = "/user/queue/notifications";
/// Personal unread-count queue.
pub const DEST_UNREAD_COUNT: &str = "/user/queue/unread-count";
/// Default destination for the "client connected" announcement.
pub const DEST_CONNECT: &str = "/app/connect";
/// Alternative announcement destination used by some deployments.
pub const DEST_NOTIFICATIONS_CONNECT: &str = "/app/notifications/connect";
/// Destination of the auth message in the header-less variant.
pub const DEST_AUTH: &str = "/app/auth";

/// Heartbeat interval in both directions.
pub const HEARTBEAT_INTERVAL_MS: u64 = 4_000;
/// Consecutive silent heartbeat intervals before the connection is declared dead.
pub const MISSED_HEARTBEATS_LIMIT: u32 = 3;
/// Delay between a drop and the next connect attempt.
pub const RECONNECT_DELAY_MS: u64 = 5_000;
/// Bound on waiting for the connect acknowledgment.
pub const AUTH_TIMEOUT_MS: u64 = 10_000;

/// STOMP versions offered in CONNECT.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// An already-issued bearer token together with its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Build a credential from a JWT, reading the expiry from its `exp` claim.
    ///
    /// The signature is not checked; the server does that. We only need to know
    /// when to stop presenting the token.
    pub fn from_jwt(token: impl Into<String>) -> Result<Self, NotifyError> {
        #[derive(serde::Deserialize)]
        struct Claims {
            exp: i64,
        }

        let token = token.into();
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| NotifyError::auth("token is not a JWT"))?;
        let decoded = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|_| NotifyError::auth("JWT payload is not base64url"))?;
        let claims: Claims = serde_json::from_slice(&decoded)
            .map_err(|_| NotifyError::auth("JWT payload has no numeric exp claim"))?;
        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or_else(|| NotifyError::auth("JWT exp claim out of range"))?;

        Ok(Self { token, expires_at })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Value for the `Authorization` connect header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

// Tokens never end up in logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn jwt_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let cred = Credential::new("tok", now);
        assert!(cred.is_expired_at(now));
        assert!(!cred.is_expired_at(now - Duration::seconds(1)));
    }

    #[test]
    fn from_jwt_reads_exp() {
        let cred = Credential::from_jwt(jwt_with_payload(r#"{"sub":"u1","exp":4102444800}"#))
            .unwrap();
        assert_eq!(cred.expires_at().timestamp(), 4_102_444_800);
        assert!(!cred.is_expired());
        assert!(cred.bearer().starts_with("Bearer "));
    }

    #[test]
    fn from_jwt_rejects_garbage() {
        assert!(Credential::from_jwt("tok-valid").unwrap_err().is_auth());
        assert!(Credential::from_jwt(jwt_with_payload(r#"{"sub":"u1"}"#)).is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let cred = Credential::new("secret-token", Utc::now());
        assert!(!format!("{cred:?}").contains("secret-token"));
    }
}
