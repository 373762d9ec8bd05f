use async_trait::async_trait;
use chrono::DateTime;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{
    Category, DraftContent, Flag, FlagDelta, Label, LabelIds, Mail, MailFlags, MailState, User,
};
use crate::remote::{LoginResponse, NewUser, RemoteClient};

/// REST client for the mail service.
#[derive(Clone)]
pub struct ApiClient {
    http: Client<HttpsConnector<HttpConnector>>,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| Error::Network(format!("cannot load native roots: {e}")))?
            .https_or_http()
            .enable_http1()
            .build();

        Ok(Self {
            http: Client::builder().build(https),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%method, %url, "remote call");

        let mut builder = Request::builder()
            .method(method)
            .uri(&url)
            .header("Accept", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&body)?)),
            None => builder.body(Body::empty()),
        }
        .map_err(|e| Error::Network(format!("cannot build request for {url}: {e}")))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if status.is_success() {
            Ok(bytes.to_vec())
        } else {
            Err(error_from_response(status, &bytes, path))
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<T> {
        let bytes = self.send(method, path, token, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Decode(format!("response of {path}: {e}")))
    }

    async fn call_empty(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<()> {
        self.send(method, path, token, body).await?;
        Ok(())
    }

    async fn mails(&self, token: &str, path: &str) -> Result<Vec<Mail>> {
        let mails: Vec<WireMail> = self.call(Method::GET, path, Some(token), None).await?;
        Ok(mails.into_iter().map(Mail::from).collect())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

fn error_from_response(status: StatusCode, bytes: &[u8], path: &str) -> Error {
    let body: ErrorBody = serde_json::from_slice(bytes).unwrap_or_default();
    let message = body
        .message
        .or(body.error)
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).trim().to_string());

    match status {
        StatusCode::NOT_FOUND => Error::NotFound(if message.is_empty() {
            path.to_string()
        } else {
            message
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Remote {
            status: status.as_u16(),
            code: body.code.unwrap_or_else(|| "unauthorized".to_string()),
            message,
        },
        _ => Error::Remote {
            status: status.as_u16(),
            code: body.code.unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("error")
                    .to_lowercase()
                    .replace(' ', "_")
            }),
            message,
        },
    }
}

/// Percent-encodes one path segment.
fn segment(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

fn category_path(category: &Category) -> String {
    match category {
        Category::Inbox => "api/mails/inbox".to_string(),
        Category::Sent => "api/mails/sent".to_string(),
        Category::Drafts => "api/mails/drafts".to_string(),
        Category::Spam => "api/mails/spam".to_string(),
        Category::Starred => "api/mails/starred".to_string(),
        Category::Important => "api/mails/important".to_string(),
        Category::Trash => "api/mails/deleted".to_string(),
        Category::Label(id) => format!("api/labels/{}/mails", segment(id)),
    }
}

/// Ids come back as strings or numbers depending on the server's store.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected id {other}"))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMail {
    #[serde(alias = "_id", deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    timestamp: Option<i64>,
    date: Option<String>,
    send: Option<bool>,
    #[serde(default)]
    is_read: bool,
    #[serde(default)]
    is_spam: bool,
    #[serde(default)]
    is_important: bool,
    #[serde(default)]
    is_starred: bool,
    #[serde(default)]
    deleted_for_sender: bool,
    #[serde(default)]
    deleted_for_receiver: bool,
    #[serde(default)]
    labels_for_sender: LabelIds,
    #[serde(default)]
    labels_for_receiver: LabelIds,
}

impl From<WireMail> for Mail {
    fn from(wire: WireMail) -> Self {
        let created_at = wire
            .timestamp
            .or_else(|| {
                wire.date
                    .as_deref()
                    .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                    .map(|d| d.timestamp_millis())
            })
            .unwrap_or_default();

        Mail {
            id: wire.id,
            from: wire.from,
            to: wire.to,
            subject: wire.subject,
            body: wire.body,
            created_at,
            state: if wire.send.unwrap_or(true) {
                MailState::Sent
            } else {
                MailState::Draft
            },
            flags: MailFlags {
                read: wire.is_read,
                spam: wire.is_spam,
                important: wire.is_important,
                starred: wire.is_starred,
                deleted_for_sender: wire.deleted_for_sender,
                deleted_for_receiver: wire.deleted_for_receiver,
            },
            labels_for_sender: wire.labels_for_sender,
            labels_for_receiver: wire.labels_for_receiver,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLabel {
    #[serde(alias = "_id", deserialize_with = "id_string")]
    id: String,
    name: String,
    #[serde(default, alias = "owner")]
    user_id: Option<String>,
}

impl From<WireLabel> for Label {
    fn from(wire: WireLabel) -> Self {
        Label::new(&wire.id, &wire.name, wire.user_id.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    #[serde(alias = "_id", deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    email_address: String,
    profile_image: Option<String>,
}

impl From<WireUser> for User {
    fn from(wire: WireUser) -> Self {
        User {
            id: wire.id,
            full_name: wire.full_name,
            email_address: wire.email_address,
            profile_image: wire.profile_image,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    email_address: &'a str,
    password: &'a str,
}

fn draft_body(content: &DraftContent, send: bool) -> Value {
    json!({
        "to": content.to,
        "subject": content.subject,
        "body": content.body,
        "send": send,
    })
}

#[async_trait]
impl RemoteClient for ApiClient {
    async fn fetch_category(&self, token: &str, category: &Category) -> Result<Vec<Mail>> {
        self.mails(token, &category_path(category)).await
    }

    async fn fetch_by_id(&self, token: &str, id: &str) -> Result<Mail> {
        let path = format!("api/mails/{}", segment(id));
        let mail: WireMail = self.call(Method::GET, &path, Some(token), None).await?;
        Ok(mail.into())
    }

    async fn search(&self, token: &str, query: &str) -> Result<Vec<Mail>> {
        self.mails(token, &format!("api/mails/search/{}", segment(query)))
            .await
    }

    async fn create_draft(&self, token: &str, content: &DraftContent) -> Result<Mail> {
        let mail: WireMail = self
            .call(Method::POST, "api/mails", Some(token), Some(draft_body(content, false)))
            .await?;
        Ok(mail.into())
    }

    async fn update_draft(&self, token: &str, id: &str, content: &DraftContent) -> Result<Mail> {
        let path = format!("api/mails/{}", segment(id));
        let mail: WireMail = self
            .call(Method::PATCH, &path, Some(token), Some(draft_body(content, false)))
            .await?;
        Ok(mail.into())
    }

    async fn send_draft(&self, token: &str, id: &str) -> Result<Mail> {
        let path = format!("api/mails/{}/send", segment(id));
        let bytes = self.send(Method::POST, &path, Some(token), None).await?;
        // Some servers answer with an empty body; read the mail back then.
        match serde_json::from_slice::<WireMail>(&bytes) {
            Ok(mail) => Ok(mail.into()),
            Err(_) => self.fetch_by_id(token, id).await,
        }
    }

    async fn send_mail(&self, token: &str, content: &DraftContent) -> Result<Mail> {
        let mail: WireMail = self
            .call(Method::POST, "api/mails", Some(token), Some(draft_body(content, true)))
            .await?;
        Ok(mail.into())
    }

    async fn update_flags(&self, token: &str, id: &str, delta: FlagDelta) -> Result<()> {
        let id = segment(id);
        let (method, path) = match (delta.flag, delta.value) {
            (Flag::Read, true) => (Method::POST, format!("api/mails/{id}/read")),
            (Flag::Read, false) => (Method::POST, format!("api/mails/{id}/unread")),
            (Flag::Spam, true) => (Method::POST, format!("api/mails/{id}/spam")),
            (Flag::Spam, false) => (Method::DELETE, format!("api/mails/{id}/spam")),
            (Flag::Important, true) => (Method::POST, format!("api/mails/{id}/important")),
            (Flag::Important, false) => (Method::DELETE, format!("api/mails/{id}/important")),
            (Flag::Starred, true) => (Method::POST, format!("api/mails/{id}/star")),
            (Flag::Starred, false) => (Method::DELETE, format!("api/mails/{id}/star")),
            (Flag::DeletedForSender | Flag::DeletedForReceiver, true) => {
                (Method::DELETE, format!("api/mails/{id}"))
            }
            (Flag::DeletedForSender | Flag::DeletedForReceiver, false) => {
                return Err(Error::validation("deleted mails cannot be restored"));
            }
        };
        self.call_empty(method, &path, Some(token), None).await
    }

    async fn delete_mail(&self, token: &str, id: &str) -> Result<()> {
        let path = format!("api/mails/{}", segment(id));
        self.call_empty(Method::DELETE, &path, Some(token), None)
            .await
    }

    async fn fetch_labels(&self, token: &str) -> Result<Vec<Label>> {
        let labels: Vec<WireLabel> = self
            .call(Method::GET, "api/labels", Some(token), None)
            .await?;
        Ok(labels.into_iter().map(Label::from).collect())
    }

    async fn create_label(&self, token: &str, name: &str) -> Result<Label> {
        let label: WireLabel = self
            .call(Method::POST, "api/labels", Some(token), Some(json!({ "name": name })))
            .await?;
        Ok(label.into())
    }

    async fn rename_label(&self, token: &str, id: &str, name: &str) -> Result<Label> {
        let path = format!("api/labels/{}", segment(id));
        let label: WireLabel = self
            .call(Method::PATCH, &path, Some(token), Some(json!({ "name": name })))
            .await?;
        Ok(label.into())
    }

    async fn delete_label(&self, token: &str, id: &str) -> Result<()> {
        let path = format!("api/labels/{}", segment(id));
        self.call_empty(Method::DELETE, &path, Some(token), None)
            .await
    }

    async fn add_mail_to_label(&self, token: &str, label_id: &str, mail_id: &str) -> Result<()> {
        let path = format!("api/labels/{}/mails", segment(label_id));
        self.call_empty(Method::POST, &path, Some(token), Some(json!({ "mailId": mail_id })))
            .await
    }

    async fn remove_mail_from_label(
        &self,
        token: &str,
        label_id: &str,
        mail_id: &str,
    ) -> Result<()> {
        let path = format!("api/labels/{}/mails/{}", segment(label_id), segment(mail_id));
        self.call_empty(Method::DELETE, &path, Some(token), None)
            .await
    }

    async fn fetch_mails_by_label(&self, token: &str, label_id: &str) -> Result<Vec<Mail>> {
        self.mails(token, &category_path(&Category::Label(label_id.to_string())))
            .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = serde_json::to_value(LoginRequest {
            email_address: email,
            password,
        })?;
        self.call(Method::POST, "api/tokens", None, Some(body)).await
    }

    async fn register(&self, user: &NewUser) -> Result<User> {
        let body = serde_json::to_value(user)?;
        let created: WireUser = self
            .call(Method::POST, "api/users", None, Some(body))
            .await?;
        Ok(created.into())
    }

    async fn fetch_user(&self, token: &str, id: &str) -> Result<User> {
        let path = format!("api/users/{}", segment(id));
        let user: WireUser = self.call(Method::GET, &path, Some(token), None).await?;
        Ok(user.into())
    }

    async fn update_user(&self, token: &str, id: &str, full_name: &str) -> Result<User> {
        let path = format!("api/users/{}", segment(id));
        let user: WireUser = self
            .call(Method::PATCH, &path, Some(token), Some(json!({ "fullName": full_name })))
            .await?;
        Ok(user.into())
    }
}
