use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Category, DraftContent, FlagDelta, Label, Mail, User};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub full_name: String,
    pub email_address: String,
    pub password: String,
}

/// Request/response access to the mail service.
///
/// Authenticated calls take the bearer token explicitly. Failures are
/// `Error::Network`, `Error::Remote` (401 for an unauthorized token) or
/// `Error::NotFound`.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn fetch_category(&self, token: &str, category: &Category) -> Result<Vec<Mail>>;
    async fn fetch_by_id(&self, token: &str, id: &str) -> Result<Mail>;
    async fn search(&self, token: &str, query: &str) -> Result<Vec<Mail>>;

    /// Stores a new draft. The returned mail carries the server id.
    async fn create_draft(&self, token: &str, content: &DraftContent) -> Result<Mail>;
    async fn update_draft(&self, token: &str, id: &str, content: &DraftContent) -> Result<Mail>;
    async fn send_draft(&self, token: &str, id: &str) -> Result<Mail>;
    /// Creates and sends in one call.
    async fn send_mail(&self, token: &str, content: &DraftContent) -> Result<Mail>;

    async fn update_flags(&self, token: &str, id: &str, delta: FlagDelta) -> Result<()>;
    async fn delete_mail(&self, token: &str, id: &str) -> Result<()>;

    async fn fetch_labels(&self, token: &str) -> Result<Vec<Label>>;
    async fn create_label(&self, token: &str, name: &str) -> Result<Label>;
    async fn rename_label(&self, token: &str, id: &str, name: &str) -> Result<Label>;
    async fn delete_label(&self, token: &str, id: &str) -> Result<()>;
    async fn add_mail_to_label(&self, token: &str, label_id: &str, mail_id: &str) -> Result<()>;
    async fn remove_mail_from_label(&self, token: &str, label_id: &str, mail_id: &str)
    -> Result<()>;
    async fn fetch_mails_by_label(&self, token: &str, label_id: &str) -> Result<Vec<Mail>>;

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse>;
    async fn register(&self, user: &NewUser) -> Result<User>;
    async fn fetch_user(&self, token: &str, id: &str) -> Result<User>;
    async fn update_user(&self, token: &str, id: &str, full_name: &str) -> Result<User>;
}
