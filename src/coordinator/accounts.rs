//! User registration, login and token refresh

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::common::auth::{hash_password, verify_password, AuthContext, TokenPair, TokenService};
use crate::common::utils::is_valid_email;
use crate::common::{Error, Result};
use crate::store::{User, UserStore};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_USERNAME_LEN: usize = 150;

/// Body of a registration request
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// Public part of a user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

fn validate(input: &NewUser) -> Result<()> {
    let username = input.username.as_str();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        return Err(Error::Validation(format!(
            "username: Must be between 1 and {} characters.",
            MAX_USERNAME_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        return Err(Error::Validation(
            "username: Letters, digits and @/./+/-/_ only.".into(),
        ));
    }
    if !is_valid_email(&input.email) {
        return Err(Error::Validation("email: Enter a valid email address.".into()));
    }
    if input.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "password: Ensure this field has at least {} characters.",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub struct Accounts {
    users: Arc<dyn UserStore>,
    tokens: Arc<TokenService>,
}

impl Accounts {
    pub fn new(users: Arc<dyn UserStore>, tokens: Arc<TokenService>) -> Self {
        Self { users, tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub async fn register(&self, input: NewUser) -> Result<UserView> {
        validate(&input)?;

        // Argon2 is CPU bound
        let password = input.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| Error::Internal(format!("hashing task failed: {}", e)))??;

        let user = self
            .users
            .create_user(User {
                id: Uuid::new_v4(),
                username: input.username,
                email: input.email.trim().to_string(),
                first_name: input.first_name,
                last_name: input.last_name,
                password_hash,
                created_at: Utc::now(),
            })
            .await?;
        tracing::info!(user = %user.id, username = %user.username, "user registered");
        Ok(user.into())
    }

    /// Check credentials and issue an access/refresh pair
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        let user = self
            .users
            .find_user_by_username(username)
            .await?
            .ok_or(Error::InvalidCredentials)?;

        let hash = user.password_hash.clone();
        let password = password.to_string();
        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| Error::Internal(format!("verify task failed: {}", e)))?;
        if !valid {
            tracing::debug!(username = %username, "login rejected");
            return Err(Error::InvalidCredentials);
        }

        self.tokens.issue_pair(&AuthContext {
            user_id: user.id,
            username: user.username,
        })
    }

    pub fn refresh(&self, refresh_token: &str) -> Result<String> {
        self.tokens.refresh(refresh_token)
    }

    pub async fn me(&self, ctx: &AuthContext) -> Result<UserView> {
        self.users
            .get_user(ctx.user_id)
            .await?
            .map(UserView::from)
            .ok_or(Error::UserNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::auth::{AuthResult, TokenType};
    use crate::common::config::AuthConfig;
    use crate::store::MemoryStore;

    fn accounts() -> Accounts {
        Accounts::new(
            Arc::new(MemoryStore::new()),
            Arc::new(TokenService::new(&AuthConfig::default())),
        )
    }

    fn new_user(username: &str, email: &str, password: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    #[tokio::test]
    async fn test_register_login_me() {
        let accounts = accounts();
        let user = accounts
            .register(new_user("user1", "u1@example.com", "secret1"))
            .await
            .unwrap();
        assert_eq!(user.username, "user1");

        let pair = accounts.login("user1", "secret1").await.unwrap();
        let ctx = match accounts.tokens().validate(&pair.access, TokenType::Access) {
            AuthResult::Ok(ctx) => ctx,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(accounts.me(&ctx).await.unwrap(), user);

        let access = accounts.refresh(&pair.refresh).unwrap();
        assert!(matches!(
            accounts.tokens().validate(&access, TokenType::Access),
            AuthResult::Ok(_)
        ));
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let accounts = accounts();
        accounts
            .register(new_user("user1", "u1@example.com", "secret1"))
            .await
            .unwrap();

        assert!(matches!(
            accounts.login("user1", "wrong!").await,
            Err(Error::InvalidCredentials)
        ));
        assert!(matches!(
            accounts.login("ghost", "secret1").await,
            Err(Error::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_registration_validation() {
        let accounts = accounts();
        for input in [
            new_user("user1", "u1@example.com", "short"),
            new_user("user1", "not-an-email", "secret1"),
            new_user("", "u1@example.com", "secret1"),
            new_user("bad name", "u1@example.com", "secret1"),
        ] {
            assert!(matches!(
                accounts.register(input).await,
                Err(Error::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let accounts = accounts();
        accounts
            .register(new_user("user1", "u1@example.com", "secret1"))
            .await
            .unwrap();
        assert!(matches!(
            accounts
                .register(new_user("user2", "u1@example.com", "secret2"))
                .await,
            Err(Error::UserExists)
        ));
    }
}
