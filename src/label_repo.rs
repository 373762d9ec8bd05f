use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mail_repo::MailRepository;
use crate::models::{Category, Label, Mail};

/// Label CRUD, always confirmed by the remote.
///
/// Unlike flag toggles nothing is patched locally: after every change the
/// whole list is fetched again.
pub struct LabelRepository {
    mails: Arc<MailRepository>,
    labels: RwLock<Vec<Label>>,
}

impl LabelRepository {
    pub fn new(mails: Arc<MailRepository>) -> Self {
        Self {
            mails,
            labels: RwLock::new(Vec::new()),
        }
    }

    /// The list as of the last refresh, sorted by name.
    pub async fn labels(&self) -> Vec<Label> {
        self.labels.read().await.clone()
    }

    pub async fn find(&self, id: &str) -> Option<Label> {
        self.labels.read().await.iter().find(|l| l.id == id).cloned()
    }

    pub async fn refresh(&self) -> Result<Vec<Label>> {
        let token = self.mails.session().token()?;
        let mut labels = self.mails.remote().fetch_labels(&token).await?;

        for label in labels.iter_mut() {
            if label.display_name.is_empty() {
                *label = Label::new(&label.id, &label.name, label.owner.as_deref());
            }
        }
        labels.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

        debug!(count = labels.len(), "labels refreshed");
        *self.labels.write().await = labels.clone();
        Ok(labels)
    }

    pub async fn create(&self, name: &str) -> Result<Vec<Label>> {
        let name = validate_name(name)?;
        let token = self.mails.session().token()?;
        let created = self.mails.remote().create_label(&token, name).await?;
        info!(id = %created.id, name, "label created");
        self.refresh().await
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<Vec<Label>> {
        let name = validate_name(name)?;
        let token = self.mails.session().token()?;
        self.mails.remote().rename_label(&token, id, name).await?;
        info!(id, name, "label renamed");
        self.refresh().await
    }

    /// Deletes the label remotely, then drops it from cached mails.
    ///
    /// Once the remote has confirmed, a failed refetch only logs: the list
    /// is returned without the deleted label.
    pub async fn delete(&self, id: &str) -> Result<Vec<Label>> {
        let token = self.mails.session().token()?;
        self.mails.remote().delete_label(&token, id).await?;
        info!(id, "label deleted");
        self.mails.forget_label(id).await?;

        match self.refresh().await {
            Ok(labels) => Ok(labels),
            Err(err) => {
                warn!(id, error = %err, "label list refresh failed after delete");
                let mut labels = self.labels.write().await;
                labels.retain(|l| l.id != id);
                Ok(labels.clone())
            }
        }
    }

    /// Mails carrying the label, fetched and cached like any category.
    pub async fn mails(&self, label_id: &str) -> Result<Vec<Mail>> {
        self.mails
            .fetch_category(&Category::Label(label_id.to_string()))
            .await
    }

    pub async fn add_mail(&self, label_id: &str, mail_id: &str) -> Result<()> {
        self.mails.add_label(mail_id, label_id).await
    }

    pub async fn remove_mail(&self, label_id: &str, mail_id: &str) -> Result<()> {
        self.mails.remove_label(mail_id, label_id).await
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("label name is required"));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, mail};

    #[tokio::test]
    async fn test_changes_are_followed_by_a_refetch() {
        let f = fixture().await;
        f.remote.put_label(Label::new("l1", "work", None));
        let labels = LabelRepository::new(f.repo.clone());

        let listed = labels.create("travel").await.unwrap();
        assert_eq!(
            listed.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(),
            vec!["travel", "work"]
        );
        assert_eq!(f.remote.count("fetch_labels"), 1);

        let listed = labels.rename("l1", "jobs").await.unwrap();
        assert_eq!(listed[0].display_name, "Jobs");
        assert_eq!(f.remote.count("fetch_labels"), 2);
    }

    #[tokio::test]
    async fn test_failed_create_keeps_the_list() {
        let f = fixture().await;
        f.remote.put_label(Label::new("l1", "work", None));
        let labels = LabelRepository::new(f.repo.clone());
        labels.refresh().await.unwrap();

        f.remote.fail("create_label:travel");
        assert!(labels.create("travel").await.is_err());
        assert_eq!(labels.labels().await.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_name_is_rejected_locally() {
        let f = fixture().await;
        let labels = LabelRepository::new(f.repo.clone());
        assert!(matches!(labels.create("   ").await, Err(Error::Validation(_))));
        assert!(f.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_strips_label_from_cached_mails() {
        let f = fixture().await;
        f.remote.put_label(Label::new("l1", "work", None));
        f.remote.put_category(Category::Inbox, vec![mail("a", 1)]);
        f.repo.fetch_category(&Category::Inbox).await.unwrap();
        let labels = LabelRepository::new(f.repo.clone());

        labels.add_mail("l1", "a").await.unwrap();
        assert_eq!(labels.mails("l1").await.unwrap().len(), 1);

        labels.delete("l1").await.unwrap();
        assert!(labels.find("l1").await.is_none());
        let stored = f.db.get_mail("a").await.unwrap().unwrap();
        assert!(!stored.labels_for_receiver.contains("l1"));
    }

    #[tokio::test]
    async fn test_delete_survives_failed_refetch() {
        let f = fixture().await;
        f.remote.put_label(Label::new("l1", "work", None));
        f.remote.put_label(Label::new("l2", "travel", None));
        let labels = LabelRepository::new(f.repo.clone());
        labels.refresh().await.unwrap();

        f.remote.fail("fetch_labels");
        let listed = labels.delete("l1").await.unwrap();
        assert_eq!(listed.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), vec!["l2"]);
        assert!(labels.find("l1").await.is_none());
        assert_eq!(f.remote.count("delete_label:l1"), 1);
    }

    #[tokio::test]
    async fn test_add_then_remove_leaves_label_empty() {
        let f = fixture().await;
        f.remote.put_category(Category::Inbox, vec![mail("a", 1)]);
        f.repo.fetch_category(&Category::Inbox).await.unwrap();
        let labels = LabelRepository::new(f.repo.clone());

        labels.add_mail("l1", "a").await.unwrap();
        labels.remove_mail("l1", "a").await.unwrap();
        assert!(labels.mails("l1").await.unwrap().is_empty());
    }
}
