use std::str::FromStr;
use std::sync::Arc;

use email_address::EmailAddress;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::auth::SessionStore;
use crate::db::{Database, MailQuery};
use crate::error::{Error, Result};
use crate::models::{Category, DraftContent, Flag, FlagDelta, Mail, MailState, Side};
use crate::remote::RemoteClient;
use crate::sync::{GenerationTracker, MutationLocks};
use crate::undo::Rollback;

/// One action applied to every id of a multi-selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkAction {
    MarkRead,
    MarkUnread,
    Spam,
    NotSpam,
    Star,
    Unstar,
    Important,
    NotImportant,
    Delete,
    AddLabel(String),
    RemoveLabel(String),
}

#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl BulkOutcome {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Checks a comma separated recipient list before anything is sent.
pub fn validate_recipients(to: &str) -> Result<()> {
    let recipients: Vec<&str> = to
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .collect();

    if recipients.is_empty() {
        return Err(Error::validation("recipient is required"));
    }

    for recipient in recipients {
        let address = EmailAddress::from_str(recipient)
            .map_err(|e| Error::validation(format!("invalid email address {recipient:?}: {e}")))?;
        // `bob@localhost` parses; the service needs a dotted domain.
        if !address.domain().contains('.') {
            return Err(Error::validation(format!(
                "invalid email address {recipient:?}: domain has no dot"
            )));
        }
    }
    Ok(())
}

/// Reconciles the local cache with the remote for every mail category.
///
/// Reads re-validate against the remote and fall back to the cache. Flag
/// changes are written to the cache first and reverted if the remote says
/// no. Label membership and draft state follow the remote.
pub struct MailRepository {
    db: Database,
    remote: Arc<dyn RemoteClient>,
    session: Arc<dyn SessionStore>,
    generations: GenerationTracker,
    locks: MutationLocks,
}

impl MailRepository {
    pub fn new(db: Database, remote: Arc<dyn RemoteClient>, session: Arc<dyn SessionStore>) -> Self {
        Self {
            db,
            remote,
            session,
            generations: GenerationTracker::new(),
            locks: MutationLocks::new(),
        }
    }

    pub(crate) fn remote(&self) -> &Arc<dyn RemoteClient> {
        &self.remote
    }

    pub(crate) fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    /// Fetches a category from the remote and stores it as that
    /// category's snapshot.
    ///
    /// A response is written only if no newer fetch of the same category
    /// completed first; a stale caller gets the current snapshot instead.
    /// When the remote fails, the cached snapshot is served if there is one.
    pub async fn fetch_category(&self, category: &Category) -> Result<Vec<Mail>> {
        let token = self.session.token()?;
        let ticket = self.generations.begin(category);
        debug!(%category, generation = ticket.generation, "fetching category");

        let fetched = match category {
            Category::Label(label_id) => self.remote.fetch_mails_by_label(&token, label_id).await,
            _ => self.remote.fetch_category(&token, category).await,
        };

        match fetched {
            Ok(mut mails) => {
                let fetched = &mut mails;
                let applied = self
                    .generations
                    .apply_if_fresh(&ticket, move || async move {
                        self.keep_in_flight(fetched).await?;
                        self.db.replace_category(category, fetched).await
                    })
                    .await?;
                if applied {
                    Ok(mails)
                } else {
                    debug!(%category, generation = ticket.generation, "dropping stale response");
                    self.cached(category).await
                }
            }
            Err(err) if err.is_remote_failure() => {
                let cached = self.cached(category).await?;
                if cached.is_empty() && !self.db.has_snapshot(category).await? {
                    return Err(err);
                }
                warn!(%category, error = %err, "remote fetch failed, serving cached snapshot");
                Ok(cached)
            }
            Err(err) => Err(err),
        }
    }

    /// Carries the cached flags and labels over for mails that have a
    /// mutation running, so a fetch answered before the mutation landed
    /// does not undo it.
    async fn keep_in_flight(&self, mails: &mut [Mail]) -> Result<()> {
        let in_flight = self.locks.in_flight();
        if in_flight.is_empty() {
            return Ok(());
        }

        for mail in mails.iter_mut().filter(|m| in_flight.contains(&m.id)) {
            if let Some(cached) = self.db.get_mail(&mail.id).await? {
                debug!(id = %mail.id, "mutation in flight, keeping cached flags");
                mail.flags = cached.flags;
                mail.labels_for_sender = cached.labels_for_sender;
                mail.labels_for_receiver = cached.labels_for_receiver;
            }
        }
        Ok(())
    }

    /// Fetches several categories concurrently.
    pub async fn fetch_categories(&self, categories: &[Category]) -> Vec<(Category, Result<Vec<Mail>>)> {
        let fetches = categories.iter().map(|category| async move {
            (category.clone(), self.fetch_category(category).await)
        });
        join_all(fetches).await
    }

    /// Current snapshot of a category, without asking the remote.
    ///
    /// Mails the viewer deleted are only listed under trash, and the
    /// starred, important and spam views only list mails still carrying
    /// their flag, so optimistic changes show up before the next fetch.
    pub async fn cached(&self, category: &Category) -> Result<Vec<Mail>> {
        let mails = self.db.query(&MailQuery::Category(category.clone())).await?;
        if *category == Category::Trash {
            return Ok(mails);
        }

        let viewer = self.session.email_address()?;
        let required = category.flag();
        Ok(mails
            .into_iter()
            .filter(|m| !m.flags.get(m.side_for(viewer.as_deref()).deleted_flag()))
            .filter(|m| required.map_or(true, |flag| m.flags.get(flag)))
            .collect())
    }

    pub async fn query(&self, query: &MailQuery) -> Result<Vec<Mail>> {
        self.db.query(query).await
    }

    /// Reads one mail from the remote and refreshes its cached row,
    /// falling back to the cache when the remote is unreachable.
    pub async fn get_mail(&self, id: &str) -> Result<Mail> {
        let token = self.session.token()?;
        match self.remote.fetch_by_id(&token, id).await {
            Ok(mail) => {
                self.db.upsert_mail(&mail).await?;
                Ok(mail)
            }
            Err(Error::NotFound(what)) => {
                self.db.delete_mail(id).await?;
                Err(Error::NotFound(what))
            }
            Err(err) if err.is_remote_failure() => match self.db.get_mail(id).await? {
                Some(mail) => {
                    warn!(id, error = %err, "remote read failed, serving cached mail");
                    Ok(mail)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    pub async fn set_read(&self, id: &str, read: bool) -> Result<()> {
        self.mutate_flag(id, FlagDelta::new(Flag::Read, read)).await
    }

    pub async fn set_spam(&self, id: &str, spam: bool) -> Result<()> {
        self.mutate_flag(id, FlagDelta::new(Flag::Spam, spam)).await
    }

    pub async fn set_important(&self, id: &str, important: bool) -> Result<()> {
        self.mutate_flag(id, FlagDelta::new(Flag::Important, important))
            .await
    }

    pub async fn set_starred(&self, id: &str, starred: bool) -> Result<()> {
        self.mutate_flag(id, FlagDelta::new(Flag::Starred, starred))
            .await
    }

    async fn mutate_flag(&self, id: &str, delta: FlagDelta) -> Result<()> {
        let token = self.session.token()?;
        let _guard = self.locks.acquire(id).await;

        let rollback = Rollback::apply_flag(&self.db, id, delta.flag, delta.value).await?;
        if let Err(err) = self.remote.update_flags(&token, id, delta).await {
            warn!(id, flag = ?delta.flag, error = %err, "flag update rejected, reverting {}", rollback.description());
            rollback.revert(&self.db).await?;
            return Err(err);
        }

        // A fetch may have stored the pre-mutation value meanwhile.
        self.db.set_flag(id, delta.flag, delta.value).await?;
        debug!(id, flag = ?delta.flag, value = delta.value, "flag update confirmed");
        Ok(())
    }

    /// Deletes the mail for the viewer's side only.
    ///
    /// Once both sides have deleted it, the local row is purged; the remote
    /// keeps its copy.
    pub async fn soft_delete(&self, id: &str) -> Result<()> {
        let token = self.session.token()?;
        let viewer = self.session.email_address()?;
        let _guard = self.locks.acquire(id).await;

        let side = match self.db.get_mail(id).await? {
            Some(mail) => mail.side_for(viewer.as_deref()),
            None => Side::Receiver,
        };

        let rollback = Rollback::apply_flag(&self.db, id, side.deleted_flag(), true).await?;
        if let Err(err) = self.remote.delete_mail(&token, id).await {
            warn!(id, error = %err, "delete rejected, restoring mail");
            rollback.revert(&self.db).await?;
            return Err(err);
        }

        if let Some(mail) = self.db.get_mail(id).await? {
            if mail.flags.deleted_for_both() {
                info!(id, "mail deleted on both sides, purging local copy");
                self.db.delete_mail(id).await?;
            }
        }
        Ok(())
    }

    /// Remote-only search. Results never touch the cache.
    pub async fn search(&self, query: &str) -> Result<Vec<Mail>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::validation("search query is empty"));
        }
        let token = self.session.token()?;
        self.remote.search(&token, query).await
    }

    /// Tags a mail once the remote has accepted it. Nothing is written
    /// locally before that.
    pub async fn add_label(&self, mail_id: &str, label_id: &str) -> Result<()> {
        let token = self.session.token()?;
        let _guard = self.locks.acquire(mail_id).await;

        self.remote
            .add_mail_to_label(&token, label_id, mail_id)
            .await?;

        let viewer = self.session.email_address()?;
        if let Some(mut mail) = self.db.get_mail(mail_id).await? {
            let side = mail.side_for(viewer.as_deref());
            if mail.labels_mut(side).insert(label_id) {
                self.db.set_labels(mail_id, side, mail.labels(side)).await?;
            }
            self.db
                .add_to_category(mail_id, &Category::Label(label_id.to_string()))
                .await?;
        }
        Ok(())
    }

    pub async fn remove_label(&self, mail_id: &str, label_id: &str) -> Result<()> {
        let token = self.session.token()?;
        let _guard = self.locks.acquire(mail_id).await;

        self.remote
            .remove_mail_from_label(&token, label_id, mail_id)
            .await?;

        let viewer = self.session.email_address()?;
        if let Some(mut mail) = self.db.get_mail(mail_id).await? {
            let side = mail.side_for(viewer.as_deref());
            if mail.labels_mut(side).remove(label_id) {
                self.db.set_labels(mail_id, side, mail.labels(side)).await?;
            }
        }
        self.db
            .remove_from_category(mail_id, &Category::Label(label_id.to_string()))
            .await?;
        Ok(())
    }

    /// Drops a deleted label from every cached mail.
    pub async fn forget_label(&self, label_id: &str) -> Result<()> {
        self.db.strip_label(label_id).await
    }

    /// Applies `action` to each id on its own. There is no atomicity across
    /// ids; the outcome lists which ids failed so they can be retried.
    pub async fn bulk(&self, ids: &[String], action: BulkAction) -> Result<BulkOutcome> {
        self.session.token()?;

        let mut unique: Vec<&str> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id.as_str()) {
                unique.push(id);
            }
        }

        let action = &action;
        let results = join_all(
            unique
                .into_iter()
                .map(|id| async move { (id.to_string(), self.apply(id, action).await) }),
        )
        .await;

        let mut outcome = BulkOutcome::default();
        for (id, result) in results {
            match result {
                Ok(()) => outcome.succeeded.push(id),
                Err(err) => outcome.failed.push((id, err)),
            }
        }

        if !outcome.is_complete() {
            warn!(action = ?action, failed = ?outcome.failed_ids(), "bulk action partially failed");
        }
        Ok(outcome)
    }

    async fn apply(&self, id: &str, action: &BulkAction) -> Result<()> {
        match action {
            BulkAction::MarkRead => self.set_read(id, true).await,
            BulkAction::MarkUnread => self.set_read(id, false).await,
            BulkAction::Spam => self.set_spam(id, true).await,
            BulkAction::NotSpam => self.set_spam(id, false).await,
            BulkAction::Star => self.set_starred(id, true).await,
            BulkAction::Unstar => self.set_starred(id, false).await,
            BulkAction::Important => self.set_important(id, true).await,
            BulkAction::NotImportant => self.set_important(id, false).await,
            BulkAction::Delete => self.soft_delete(id).await,
            BulkAction::AddLabel(label_id) => self.add_label(id, label_id).await,
            BulkAction::RemoveLabel(label_id) => self.remove_label(id, label_id).await,
        }
    }

    /// Stores draft content remotely, creating the draft when `id` is
    /// `None` and updating it in place otherwise.
    pub async fn save_draft(&self, id: Option<&str>, content: &DraftContent) -> Result<Mail> {
        let token = self.session.token()?;

        let (mut saved, _guard) = match id {
            None => (self.remote.create_draft(&token, content).await?, None),
            Some(id) => {
                let guard = self.locks.acquire(id).await;
                let mut saved = self.remote.update_draft(&token, id, content).await?;
                if saved.id != id {
                    warn!(id, returned = %saved.id, "server answered a draft update with another id");
                    saved.id = id.to_string();
                }
                (saved, Some(guard))
            }
        };

        saved.state = MailState::Draft;
        self.db.upsert_mail(&saved).await?;
        self.db.add_to_category(&saved.id, &Category::Drafts).await?;
        debug!(id = %saved.id, "draft saved");
        Ok(saved)
    }

    /// Sends a stored draft in place, or creates and sends in one call when
    /// there is no draft id yet.
    ///
    /// A failed send leaves the draft in the drafts category, marked failed.
    pub async fn send(&self, id: Option<&str>, content: &DraftContent) -> Result<Mail> {
        validate_recipients(&content.to)?;
        let token = self.session.token()?;

        let Some(id) = id else {
            let mut sent = self.remote.send_mail(&token, content).await?;
            sent.state = MailState::Sent;
            self.db.upsert_mail(&sent).await?;
            self.db.add_to_category(&sent.id, &Category::Sent).await?;
            info!(id = %sent.id, "mail sent");
            return Ok(sent);
        };

        let _guard = self.locks.acquire(id).await;
        self.db.set_state(id, MailState::Sending).await?;

        match self.remote.send_draft(&token, id).await {
            Ok(mut sent) => {
                sent.id = id.to_string();
                sent.state = MailState::Sent;
                self.db.upsert_mail(&sent).await?;
                self.db.remove_from_category(id, &Category::Drafts).await?;
                self.db.add_to_category(id, &Category::Sent).await?;
                info!(id, "draft sent");
                Ok(sent)
            }
            Err(err) => {
                warn!(id, error = %err, "send failed, draft kept");
                self.db.set_state(id, MailState::Failed).await?;
                Err(err)
            }
        }
    }
}
