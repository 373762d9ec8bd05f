//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::auth::{MemoryStore, Session};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::mail_repo::MailRepository;
use crate::models::{
    Category, DraftContent, FlagDelta, Label, LabelIds, Mail, MailFlags, MailState, User,
};
use crate::remote::{LoginResponse, NewUser, RemoteClient};

pub const VIEWER: &str = "bob@smail.com";

/// A received mail, newest when `created_at` is largest.
pub fn mail(id: &str, created_at: i64) -> Mail {
    Mail {
        id: id.to_string(),
        from: "alice@smail.com".to_string(),
        to: VIEWER.to_string(),
        subject: format!("subject {id}"),
        body: format!("body {id}"),
        created_at,
        state: MailState::Sent,
        flags: MailFlags::default(),
        labels_for_sender: LabelIds::new(),
        labels_for_receiver: LabelIds::new(),
    }
}

pub fn session() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_session(Session {
        token: "token".to_string(),
        user_id: "u-bob".to_string(),
        full_name: "Bob".to_string(),
        profile_image: None,
        email_address: VIEWER.to_string(),
    }))
}

pub struct Fixture {
    pub db: Database,
    pub remote: Arc<MockRemote>,
    pub session: Arc<MemoryStore>,
    pub repo: Arc<MailRepository>,
}

pub async fn fixture() -> Fixture {
    let db = Database::in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    let remote = Arc::new(MockRemote::default());
    let session = session();
    let repo = Arc::new(MailRepository::new(
        db.clone(),
        remote.clone(),
        session.clone(),
    ));
    Fixture {
        db,
        remote,
        session,
        repo,
    }
}

#[derive(Default)]
struct MockState {
    mails: HashMap<String, Mail>,
    categories: HashMap<Category, Vec<String>>,
    queued: HashMap<Category, VecDeque<Vec<Mail>>>,
    labels: Vec<Label>,
    associations: HashMap<String, Vec<String>>,
    users: HashMap<String, User>,
    failures: HashSet<String>,
    gates: HashMap<String, oneshot::Receiver<()>>,
    calls: Vec<String>,
    next_id: u64,
}

/// Scriptable in-memory remote.
///
/// Every call is recorded as `op` or `op:arg`. A call whose key was passed
/// to [`MockRemote::fail`] returns a network error, and one with a gate
/// waits until the gate's sender fires or drops.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn put_category(&self, category: Category, mails: Vec<Mail>) {
        let mut state = self.state();
        let ids = mails.iter().map(|m| m.id.clone()).collect();
        for m in mails {
            state.mails.insert(m.id.clone(), m);
        }
        state.categories.insert(category, ids);
    }

    /// Answers the next fetch of `category` with `mails`, ahead of
    /// anything set through `put_category`.
    pub fn queue_category(&self, category: Category, mails: Vec<Mail>) {
        self.state()
            .queued
            .entry(category)
            .or_default()
            .push_back(mails);
    }

    pub fn put_label(&self, label: Label) {
        self.state().labels.push(label);
    }

    pub fn put_user(&self, user: User) {
        self.state().users.insert(user.id.clone(), user);
    }

    pub fn fail(&self, key: &str) {
        self.state().failures.insert(key.to_string());
    }

    pub fn heal(&self, key: &str) {
        self.state().failures.remove(key);
    }

    pub fn gate(&self, key: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state().gates.insert(key.to_string(), rx);
        tx
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn stored(&self, id: &str) -> Option<Mail> {
        self.state().mails.get(id).cloned()
    }

    async fn enter(&self, key: String) -> Result<()> {
        let gate = {
            let mut state = self.state();
            state.calls.push(key.clone());
            state.gates.remove(&key)
        };

        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if self.state().failures.contains(&key) {
            return Err(Error::Network(format!("{key} failed")));
        }
        Ok(())
    }

    fn new_id(&self) -> String {
        let mut state = self.state();
        state.next_id += 1;
        format!("srv-{}", state.next_id)
    }

    fn store_draft(&self, id: &str, content: &DraftContent, mail_state: MailState) -> Mail {
        let mut m = mail(id, 1_000 + self.state().next_id as i64);
        m.from = VIEWER.to_string();
        m.to = content.to.clone();
        m.subject = content.subject.clone();
        m.body = content.body.clone();
        m.state = mail_state;
        self.state().mails.insert(id.to_string(), m.clone());
        m
    }

    fn label_mails(&self, label_id: &str) -> Vec<Mail> {
        let state = self.state();
        state
            .associations
            .get(label_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.mails.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn fetch_category(&self, _token: &str, category: &Category) -> Result<Vec<Mail>> {
        let queued = self
            .state()
            .queued
            .get_mut(category)
            .and_then(VecDeque::pop_front);
        self.enter(format!("fetch_category:{category}")).await?;

        if let Some(mails) = queued {
            return Ok(mails);
        }
        if let Category::Label(label_id) = category {
            return Ok(self.label_mails(label_id));
        }

        let state = self.state();
        Ok(state
            .categories
            .get(category)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.mails.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_by_id(&self, _token: &str, id: &str) -> Result<Mail> {
        self.enter(format!("fetch_by_id:{id}")).await?;
        self.stored(id).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn search(&self, _token: &str, query: &str) -> Result<Vec<Mail>> {
        self.enter(format!("search:{query}")).await?;
        let query = query.to_lowercase();
        Ok(self
            .state()
            .mails
            .values()
            .filter(|m| {
                m.subject.to_lowercase().contains(&query) || m.body.to_lowercase().contains(&query)
            })
            .cloned()
            .collect())
    }

    async fn create_draft(&self, _token: &str, content: &DraftContent) -> Result<Mail> {
        self.enter("create_draft".to_string()).await?;
        let id = self.new_id();
        Ok(self.store_draft(&id, content, MailState::Draft))
    }

    async fn update_draft(&self, _token: &str, id: &str, content: &DraftContent) -> Result<Mail> {
        self.enter(format!("update_draft:{id}")).await?;
        if self.stored(id).is_none() {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(self.store_draft(id, content, MailState::Draft))
    }

    async fn send_draft(&self, _token: &str, id: &str) -> Result<Mail> {
        self.enter(format!("send_draft:{id}")).await?;
        let mut state = self.state();
        let m = state
            .mails
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        m.state = MailState::Sent;
        Ok(m.clone())
    }

    async fn send_mail(&self, _token: &str, content: &DraftContent) -> Result<Mail> {
        self.enter("send_mail".to_string()).await?;
        let id = self.new_id();
        Ok(self.store_draft(&id, content, MailState::Sent))
    }

    async fn update_flags(&self, _token: &str, id: &str, delta: FlagDelta) -> Result<()> {
        self.enter(format!("update_flags:{id}")).await?;
        if let Some(m) = self.state().mails.get_mut(id) {
            m.flags.set(delta.flag, delta.value);
        }
        Ok(())
    }

    async fn delete_mail(&self, _token: &str, id: &str) -> Result<()> {
        self.enter(format!("delete_mail:{id}")).await?;
        Ok(())
    }

    async fn fetch_labels(&self, _token: &str) -> Result<Vec<Label>> {
        self.enter("fetch_labels".to_string()).await?;
        Ok(self.state().labels.clone())
    }

    async fn create_label(&self, _token: &str, name: &str) -> Result<Label> {
        self.enter(format!("create_label:{name}")).await?;
        let id = self.new_id();
        let label = Label::new(&id, name, Some("u-bob"));
        self.state().labels.push(label.clone());
        Ok(label)
    }

    async fn rename_label(&self, _token: &str, id: &str, name: &str) -> Result<Label> {
        self.enter(format!("rename_label:{id}")).await?;
        let mut state = self.state();
        let label = state
            .labels
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        *label = Label::new(id, name, label.owner.as_deref());
        Ok(label.clone())
    }

    async fn delete_label(&self, _token: &str, id: &str) -> Result<()> {
        self.enter(format!("delete_label:{id}")).await?;
        let mut state = self.state();
        state.labels.retain(|l| l.id != id);
        state.associations.remove(id);
        Ok(())
    }

    async fn add_mail_to_label(&self, _token: &str, label_id: &str, mail_id: &str) -> Result<()> {
        self.enter(format!("add_mail_to_label:{mail_id}")).await?;
        let mut state = self.state();
        let ids = state.associations.entry(label_id.to_string()).or_default();
        if !ids.iter().any(|id| id == mail_id) {
            ids.push(mail_id.to_string());
        }
        if let Some(m) = state.mails.get_mut(mail_id) {
            m.labels_for_receiver.insert(label_id);
        }
        Ok(())
    }

    async fn remove_mail_from_label(
        &self,
        _token: &str,
        label_id: &str,
        mail_id: &str,
    ) -> Result<()> {
        self.enter(format!("remove_mail_from_label:{mail_id}"))
            .await?;
        let mut state = self.state();
        if let Some(ids) = state.associations.get_mut(label_id) {
            ids.retain(|id| id != mail_id);
        }
        if let Some(m) = state.mails.get_mut(mail_id) {
            m.labels_for_receiver.remove(label_id);
        }
        Ok(())
    }

    async fn fetch_mails_by_label(&self, _token: &str, label_id: &str) -> Result<Vec<Mail>> {
        self.enter(format!("fetch_mails_by_label:{label_id}"))
            .await?;
        Ok(self.label_mails(label_id))
    }

    async fn login(&self, email: &str, _password: &str) -> Result<LoginResponse> {
        self.enter(format!("login:{email}")).await?;
        let state = self.state();
        let user = state
            .users
            .values()
            .find(|u| u.email_address == email)
            .ok_or_else(|| Error::unauthorized("bad credentials"))?;
        Ok(LoginResponse {
            token: format!("token-{}", user.id),
            user_id: user.id.clone(),
            full_name: user.full_name.clone(),
            profile_image: user.profile_image.clone(),
        })
    }

    async fn register(&self, user: &NewUser) -> Result<User> {
        self.enter(format!("register:{}", user.email_address))
            .await?;
        let id = self.new_id();
        let created = User {
            id,
            full_name: user.full_name.clone(),
            email_address: user.email_address.clone(),
            profile_image: None,
        };
        self.put_user(created.clone());
        Ok(created)
    }

    async fn fetch_user(&self, _token: &str, id: &str) -> Result<User> {
        self.enter(format!("fetch_user:{id}")).await?;
        self.state()
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn update_user(&self, _token: &str, id: &str, full_name: &str) -> Result<User> {
        self.enter(format!("update_user:{id}")).await?;
        let mut state = self.state();
        let user = state
            .users
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        user.full_name = full_name.to_string();
        Ok(user.clone())
    }
}
