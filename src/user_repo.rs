use std::sync::Arc;

use tracing::info;

use crate::auth::{Session, SessionStore};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::mail_repo::validate_recipients;
use crate::models::User;
use crate::remote::{NewUser, RemoteClient};

/// Login state and the signed-in user's profile.
pub struct UserRepository {
    db: Database,
    remote: Arc<dyn RemoteClient>,
    session: Arc<dyn SessionStore>,
}

impl UserRepository {
    pub fn new(db: Database, remote: Arc<dyn RemoteClient>, session: Arc<dyn SessionStore>) -> Self {
        Self {
            db,
            remote,
            session,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(Error::validation("email and password are required"));
        }

        let response = self.remote.login(email, password).await?;
        let session = Session {
            token: response.token,
            user_id: response.user_id,
            full_name: response.full_name,
            profile_image: response.profile_image,
            email_address: email.to_string(),
        };
        self.session.save(&session)?;
        self.db
            .upsert_user(&User {
                id: session.user_id.clone(),
                full_name: session.full_name.clone(),
                email_address: session.email_address.clone(),
                profile_image: session.profile_image.clone(),
            })
            .await?;

        info!(user = %session.user_id, "logged in");
        Ok(session)
    }

    pub async fn register(&self, user: &NewUser) -> Result<User> {
        if user.full_name.trim().is_empty() {
            return Err(Error::validation("full name is required"));
        }
        if user.password.len() < 8 {
            return Err(Error::validation("password must be at least 8 characters"));
        }
        validate_recipients(&user.email_address)
            .map_err(|_| Error::validation(format!("invalid email address {:?}", user.email_address)))?;

        let created = self.remote.register(user).await?;
        info!(user = %created.id, "registered");
        Ok(created)
    }

    /// Forgets the session and everything cached for it.
    pub async fn logout(&self) -> Result<()> {
        self.session.clear()?;
        self.db.clear_all().await?;
        info!("logged out, local cache cleared");
        Ok(())
    }

    pub async fn current_user(&self) -> Result<User> {
        let session = self.session.load()?.ok_or(Error::AuthMissing)?;
        if session.token.is_empty() {
            return Err(Error::AuthMissing);
        }

        if let Some(user) = self.db.get_user(&session.user_id).await? {
            return Ok(user);
        }

        let user = self
            .remote
            .fetch_user(&session.token, &session.user_id)
            .await?;
        self.db.upsert_user(&user).await?;
        Ok(user)
    }

    pub async fn update_profile(&self, full_name: &str) -> Result<User> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(Error::validation("full name is required"));
        }
        let mut session = self.session.load()?.ok_or(Error::AuthMissing)?;
        if session.token.is_empty() {
            return Err(Error::AuthMissing);
        }

        let user = self
            .remote
            .update_user(&session.token, &session.user_id, full_name)
            .await?;
        self.db.upsert_user(&user).await?;

        session.full_name = user.full_name.clone();
        self.session.save(&session)?;
        Ok(user)
    }
}
