use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::debug;

use crate::db::MailQuery;
use crate::error::{Error, Result};
use crate::mail_repo::{MailRepository, validate_recipients};
use crate::models::{DraftContent, Mail, MailState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DraftState {
    /// Nothing stored remotely yet, so no id.
    #[default]
    Unsaved,
    Draft,
    Sending,
    Sent,
    Failed,
}

/// One composer session.
///
/// The draft id is handed out by the remote on the first autosave that
/// has content, and every later save and the final send reuse it.
pub struct Composer {
    repo: Arc<MailRepository>,
    id: Option<String>,
    content: DraftContent,
    /// Content as of the last confirmed save.
    saved: Option<DraftContent>,
    state: DraftState,
}

impl Composer {
    pub fn new(repo: Arc<MailRepository>) -> Self {
        Self::with_content(repo, DraftContent::default())
    }

    pub fn with_content(repo: Arc<MailRepository>, content: DraftContent) -> Self {
        Self {
            repo,
            id: None,
            content,
            saved: None,
            state: DraftState::Unsaved,
        }
    }

    /// Reopens an existing draft under its id.
    pub async fn edit(repo: Arc<MailRepository>, id: &str) -> Result<Self> {
        let cached = repo.query(&MailQuery::Id(id.to_string())).await?.pop();
        let mail = match cached {
            Some(mail) => mail,
            None => repo.get_mail(id).await?,
        };

        let state = match mail.state {
            MailState::Draft => DraftState::Draft,
            MailState::Failed => DraftState::Failed,
            MailState::Sending | MailState::Sent => {
                return Err(Error::validation(format!("mail {id} is not a draft")));
            }
        };

        let content = DraftContent::from(&mail);
        Ok(Self {
            repo,
            id: Some(mail.id),
            saved: Some(content.clone()),
            content,
            state,
        })
    }

    pub fn reply(repo: Arc<MailRepository>, original: &Mail) -> Self {
        let subject = if original.subject.to_lowercase().starts_with("re:") {
            original.subject.clone()
        } else {
            format!("Re: {}", original.subject)
        };

        let mut body = format!("\nOn {}, {} wrote:\n", format_date(original), original.from);
        for line in original.body.lines() {
            body.push_str(&format!("> {}\n", line));
        }

        Self::with_content(repo, DraftContent::new(&original.from, &subject, &body))
    }

    pub fn forward(repo: Arc<MailRepository>, original: &Mail) -> Self {
        let subject = if original.subject.to_lowercase().starts_with("fwd:") {
            original.subject.clone()
        } else {
            format!("Fwd: {}", original.subject)
        };

        let body = format!(
            "\n---------- Forwarded message ---------\nFrom: {}\nDate: {}\nSubject: {}\nTo: {}\n\n{}",
            original.from,
            format_date(original),
            original.subject,
            original.to,
            original.body
        );

        Self::with_content(repo, DraftContent::new("", &subject, &body))
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn state(&self) -> DraftState {
        self.state
    }

    pub fn content(&self) -> &DraftContent {
        &self.content
    }

    pub fn can_retry(&self) -> bool {
        self.state == DraftState::Failed
    }

    pub fn is_dirty(&self) -> bool {
        self.saved.as_ref() != Some(&self.content)
    }

    pub fn set_content(&mut self, content: DraftContent) -> Result<()> {
        self.ensure_editable()?;
        self.content = content;
        Ok(())
    }

    pub fn set_to(&mut self, to: &str) -> Result<()> {
        self.ensure_editable()?;
        self.content.to = to.to_string();
        Ok(())
    }

    pub fn set_subject(&mut self, subject: &str) -> Result<()> {
        self.ensure_editable()?;
        self.content.subject = subject.to_string();
        Ok(())
    }

    pub fn set_body(&mut self, body: &str) -> Result<()> {
        self.ensure_editable()?;
        self.content.body = body.to_string();
        Ok(())
    }

    fn ensure_editable(&self) -> Result<()> {
        match self.state {
            DraftState::Sending | DraftState::Sent => {
                Err(Error::validation("mail was already sent"))
            }
            _ => Ok(()),
        }
    }

    /// Saves the draft when leaving the composer or at an explicit save
    /// point. Returns whether the remote was called.
    ///
    /// Empty or unchanged content is not sent anywhere.
    pub async fn autosave(&mut self) -> Result<bool> {
        self.ensure_editable()?;

        if self.content.is_empty() {
            debug!("empty composer, skipping autosave");
            return Ok(false);
        }
        if !self.is_dirty() {
            return Ok(false);
        }

        let saved = self.repo.save_draft(self.id.as_deref(), &self.content).await?;
        if self.id.is_none() {
            debug!(id = %saved.id, "draft received its id");
            self.id = Some(saved.id);
        }
        self.saved = Some(self.content.clone());
        if self.state == DraftState::Unsaved {
            self.state = DraftState::Draft;
        }
        Ok(true)
    }

    /// Sends the mail. With a draft id the draft is sent in place (after
    /// saving pending edits); without one, a single create-and-send call is
    /// made.
    ///
    /// On failure the content stays in the composer and `can_retry` is true.
    pub async fn send(&mut self) -> Result<Mail> {
        self.ensure_editable()?;
        validate_recipients(&self.content.to)?;

        if self.id.is_some() && self.is_dirty() {
            self.autosave().await?;
        }

        let previous = self.state;
        self.state = DraftState::Sending;

        match self.repo.send(self.id.as_deref(), &self.content).await {
            Ok(sent) => {
                if self.id.is_none() {
                    self.id = Some(sent.id.clone());
                }
                self.saved = Some(self.content.clone());
                self.state = DraftState::Sent;
                Ok(sent)
            }
            Err(err) if err.is_remote_failure() => {
                self.state = DraftState::Failed;
                Err(err)
            }
            Err(err) => {
                self.state = previous;
                Err(err)
            }
        }
    }
}

fn format_date(mail: &Mail) -> String {
    let date = DateTime::from_timestamp_millis(mail.created_at)
        .unwrap_or_default()
        .with_timezone(&Local);
    date.format("%a, %b %d, %Y at %l:%M %p").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use crate::testing::{fixture, mail};

    #[tokio::test]
    async fn test_empty_autosave_makes_no_remote_call() {
        let f = fixture().await;
        let mut composer = Composer::new(f.repo.clone());

        assert!(!composer.autosave().await.unwrap());
        composer.set_subject("   ").unwrap();
        assert!(!composer.autosave().await.unwrap());

        assert!(f.remote.calls().is_empty());
        assert_eq!(composer.state(), DraftState::Unsaved);
        assert_eq!(composer.id(), None);
    }

    #[tokio::test]
    async fn test_draft_id_is_reused_until_send() {
        let f = fixture().await;
        let mut composer = Composer::new(f.repo.clone());

        composer.set_to("dana@smail.com").unwrap();
        assert!(composer.autosave().await.unwrap());
        let id = composer.id().unwrap().to_string();
        assert_eq!(composer.state(), DraftState::Draft);

        composer.set_subject("plans").unwrap();
        composer.autosave().await.unwrap();
        composer.set_body("see you at noon").unwrap();
        composer.autosave().await.unwrap();
        assert_eq!(composer.id(), Some(id.as_str()));

        let sent = composer.send().await.unwrap();
        assert_eq!(sent.id, id);
        assert_eq!(composer.state(), DraftState::Sent);

        assert_eq!(f.remote.count("create_draft"), 1);
        assert_eq!(f.remote.count(&format!("update_draft:{id}")), 2);
        assert_eq!(f.remote.count(&format!("send_draft:{id}")), 1);
        assert_eq!(f.remote.count("send_mail"), 0);

        assert!(f.repo.cached(&Category::Drafts).await.unwrap().is_empty());
        let sent_box = f.repo.cached(&Category::Sent).await.unwrap();
        assert_eq!(sent_box.len(), 1);
        assert_eq!(sent_box[0].state, MailState::Sent);
    }

    #[tokio::test]
    async fn test_unchanged_content_is_not_saved_twice() {
        let f = fixture().await;
        let mut composer = Composer::new(f.repo.clone());
        composer.set_to("dana@smail.com").unwrap();

        assert!(composer.autosave().await.unwrap());
        assert!(!composer.autosave().await.unwrap());
        assert_eq!(f.remote.calls(), vec!["create_draft"]);
    }

    #[tokio::test]
    async fn test_send_without_draft_is_one_call() {
        let f = fixture().await;
        let mut composer = Composer::with_content(
            f.repo.clone(),
            DraftContent::new("dana@smail.com", "hi", "hello"),
        );

        let sent = composer.send().await.unwrap();
        assert_eq!(f.remote.calls(), vec!["send_mail"]);
        assert_eq!(composer.id(), Some(sent.id.as_str()));
        assert_eq!(composer.state(), DraftState::Sent);
    }

    #[tokio::test]
    async fn test_failed_send_without_draft_can_be_retried() {
        let f = fixture().await;
        let content = DraftContent::new("dana@smail.com", "hi", "hello");
        let mut composer = Composer::with_content(f.repo.clone(), content.clone());

        f.remote.fail("send_mail");
        let err = composer.send().await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(composer.state(), DraftState::Failed);
        assert!(composer.can_retry());
        assert_eq!(composer.content(), &content);
        assert_eq!(composer.id(), None);
        assert!(f.repo.cached(&Category::Sent).await.unwrap().is_empty());
        assert!(f.db.query(&MailQuery::All).await.unwrap().is_empty());

        f.remote.heal("send_mail");
        let sent = composer.send().await.unwrap();
        assert_eq!(composer.state(), DraftState::Sent);
        assert_eq!(f.remote.count("send_mail"), 2);
        assert_eq!(ids_of(&f.repo.cached(&Category::Sent).await.unwrap()), vec![sent.id]);
    }

    fn ids_of(mails: &[Mail]) -> Vec<String> {
        mails.iter().map(|m| m.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_missing_recipient_fails_before_network() {
        let f = fixture().await;
        let mut composer =
            Composer::with_content(f.repo.clone(), DraftContent::new("", "hi", "hello"));

        assert!(matches!(composer.send().await, Err(Error::Validation(_))));
        assert!(f.remote.calls().is_empty());
        assert_eq!(composer.state(), DraftState::Unsaved);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_draft_and_allows_retry() {
        let f = fixture().await;
        let mut composer = Composer::with_content(
            f.repo.clone(),
            DraftContent::new("dana@smail.com", "hi", "hello"),
        );
        composer.autosave().await.unwrap();
        let id = composer.id().unwrap().to_string();

        f.remote.fail(&format!("send_draft:{id}"));
        assert!(composer.send().await.is_err());
        assert_eq!(composer.state(), DraftState::Failed);
        assert!(composer.can_retry());
        assert_eq!(composer.content().body, "hello");

        let drafts = f.repo.cached(&Category::Drafts).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].state, MailState::Failed);

        f.remote.heal(&format!("send_draft:{id}"));
        composer.send().await.unwrap();
        assert_eq!(composer.state(), DraftState::Sent);
        assert!(f.repo.cached(&Category::Drafts).await.unwrap().is_empty());
        assert_eq!(f.remote.count("create_draft"), 1);
    }

    #[tokio::test]
    async fn test_sent_composer_is_read_only() {
        let f = fixture().await;
        let mut composer = Composer::with_content(
            f.repo.clone(),
            DraftContent::new("dana@smail.com", "hi", "hello"),
        );
        composer.send().await.unwrap();

        assert!(composer.set_body("changed").is_err());
        assert!(composer.autosave().await.is_err());
        assert!(composer.send().await.is_err());
        assert_eq!(f.remote.count("send_mail"), 1);
    }

    #[tokio::test]
    async fn test_edit_reuses_existing_draft_id() {
        let f = fixture().await;
        let mut draft = mail("d1", 1);
        draft.state = MailState::Draft;
        f.remote.put_category(Category::Drafts, vec![draft]);
        f.repo.fetch_category(&Category::Drafts).await.unwrap();

        let mut composer = Composer::edit(f.repo.clone(), "d1").await.unwrap();
        assert_eq!(composer.state(), DraftState::Draft);
        assert!(!composer.is_dirty());

        composer.set_body("more").unwrap();
        composer.autosave().await.unwrap();
        assert_eq!(f.remote.count("update_draft:d1"), 1);
        assert_eq!(f.remote.count("create_draft"), 0);
    }

    #[tokio::test]
    async fn test_edit_rejects_sent_mail() {
        let f = fixture().await;
        f.db.upsert_mail(&mail("s1", 1)).await.unwrap();
        assert!(matches!(
            Composer::edit(f.repo.clone(), "s1").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_reply_quotes_original() {
        let f = fixture().await;
        let mut original = mail("a", 0);
        original.body = "line one\nline two".to_string();

        let composer = Composer::reply(f.repo.clone(), &original);
        assert_eq!(composer.content().to, "alice@smail.com");
        assert_eq!(composer.content().subject, "Re: subject a");
        assert!(composer.content().body.contains("> line one\n> line two\n"));
        assert_eq!(composer.id(), None);
    }
}
