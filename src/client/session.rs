use std::sync::{Arc, RwLock};

use crate::{dto::auth::LoginResponse, models::User};

use super::{
    ClientResult,
    storage::{Storage, load_json, save_json},
};

const SESSION_KEY: &str = "session";

/// Signed-in state shared by every API call. Persisted so a restart keeps
/// the user signed in; cleared when the server answers 401.
pub struct AuthSession {
    storage: Arc<dyn Storage>,
    current: RwLock<Option<LoginResponse>>,
}

impl AuthSession {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            current: RwLock::new(None),
        }
    }

    /// Restores a previously saved session. Expired or unreadable sessions
    /// are discarded.
    pub async fn restore(storage: Arc<dyn Storage>) -> Self {
        let saved = match load_json::<LoginResponse>(storage.as_ref(), SESSION_KEY).await {
            Ok(saved) => saved,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable session");
                None
            }
        };
        let now = chrono::Utc::now().timestamp();
        let saved = saved.filter(|s| s.expires_at > now);
        Self {
            storage,
            current: RwLock::new(saved),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.read().as_ref().map(|s| s.token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.read().as_ref().map(|s| s.user.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.read().is_some()
    }

    pub async fn set(&self, login: LoginResponse) -> ClientResult<()> {
        save_json(self.storage.as_ref(), SESSION_KEY, &login).await?;
        *self.write() = Some(login);
        Ok(())
    }

    pub async fn clear(&self) {
        *self.write() = None;
        if let Err(err) = self.storage.remove(SESSION_KEY).await {
            tracing::warn!(error = %err, "failed to remove stored session");
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<LoginResponse>> {
        self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<LoginResponse>> {
        self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::client::storage::MemoryStorage;

    pub(crate) fn login(expires_at: i64) -> LoginResponse {
        LoginResponse {
            token: "jwt-token".into(),
            token_type: "Bearer".into(),
            expires_at,
            user: User {
                id: Uuid::new_v4(),
                name: "Grace".into(),
                email: "grace@example.com".into(),
                role: "user".into(),
                is_admin: false,
                is_verified: true,
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn session_survives_restore_and_clear_removes_it() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let session = AuthSession::new(storage.clone());
        session
            .set(login(Utc::now().timestamp() + 3600))
            .await
            .unwrap();

        let restored = AuthSession::restore(storage.clone()).await;
        assert_eq!(restored.token().as_deref(), Some("jwt-token"));

        restored.clear().await;
        assert!(!restored.is_signed_in());
        assert!(storage.get(SESSION_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_is_not_restored() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        AuthSession::new(storage.clone())
            .set(login(Utc::now().timestamp() - 1))
            .await
            .unwrap();

        let restored = AuthSession::restore(storage).await;
        assert!(restored.token().is_none());
    }
}
