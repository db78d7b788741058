//! Identity of the local user.
//!
//! A call session only needs to know who the local user is; everything else
//! about accounts lives behind this trait.

use crate::error::AuthError;
use crate::types::UserId;
use async_trait::async_trait;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the id of the signed-in user, or
    /// [`AuthError::NotAuthenticated`] when there is none.
    async fn current_user_id(&self) -> Result<UserId, AuthError>;
}

/// Auth provider with a fixed user id, for tests and demos.
pub struct StaticAuth {
    user_id: UserId,
}

impl StaticAuth {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn current_user_id(&self) -> Result<UserId, AuthError> {
        Ok(self.user_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_auth_returns_configured_id() {
        let auth = StaticAuth::new("alice");
        assert_eq!(auth.current_user_id().await.unwrap(), "alice");
    }
}
