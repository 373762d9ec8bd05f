use std::fmt;

use inflections::case::to_title_case;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ordered set of label ids attached to one side of a mail.
///
/// Insertion order is kept and duplicates are dropped. In storage it is a
/// JSON array, so an empty set is always `[]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<Vec<String>>", into = "Vec<String>")]
pub struct LabelIds(Vec<String>);

impl LabelIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if id.is_empty() || self.contains(&id) {
            return false;
        }
        self.0.push(id);
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|l| l != id);
        self.0.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|l| l == id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_storage(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Decodes a stored label list. NULL and empty columns are an empty set,
    /// and comma-joined lists written by older clients are still accepted.
    pub fn from_storage(raw: Option<&str>) -> Result<Self> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Ok(Self::new()),
            Some(raw) => raw,
        };

        if raw.starts_with('[') {
            let ids: Vec<String> = serde_json::from_str(raw)
                .map_err(|e| Error::Decode(format!("label list {raw:?}: {e}")))?;
            return Ok(ids.into_iter().collect());
        }

        Ok(raw.split(',').map(str::trim).collect())
    }
}

impl<S: Into<String>> FromIterator<S> for LabelIds {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut ids = LabelIds::new();
        for id in iter {
            ids.insert(id);
        }
        ids
    }
}

impl From<Option<Vec<String>>> for LabelIds {
    fn from(ids: Option<Vec<String>>) -> Self {
        ids.unwrap_or_default().into_iter().collect()
    }
}

impl From<LabelIds> for Vec<String> {
    fn from(ids: LabelIds) -> Self {
        ids.0
    }
}

/// Lifecycle of a stored mail, separate from its attribute flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailState {
    Draft,
    Sending,
    Sent,
    Failed,
}

impl MailState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailState::Draft => "draft",
            MailState::Sending => "sending",
            MailState::Sent => "sent",
            MailState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(MailState::Draft),
            "sending" => Ok(MailState::Sending),
            "sent" => Ok(MailState::Sent),
            "failed" => Ok(MailState::Failed),
            other => Err(Error::Decode(format!("mail state {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Read,
    Spam,
    Important,
    Starred,
    DeletedForSender,
    DeletedForReceiver,
}

impl Flag {
    /// Column holding this flag in the `mails` table.
    pub fn column(&self) -> &'static str {
        match self {
            Flag::Read => "is_read",
            Flag::Spam => "is_spam",
            Flag::Important => "is_important",
            Flag::Starred => "is_starred",
            Flag::DeletedForSender => "deleted_for_sender",
            Flag::DeletedForReceiver => "deleted_for_receiver",
        }
    }
}

/// A single flag change sent to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagDelta {
    pub flag: Flag,
    pub value: bool,
}

impl FlagDelta {
    pub fn new(flag: Flag, value: bool) -> Self {
        Self { flag, value }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailFlags {
    pub read: bool,
    pub spam: bool,
    pub important: bool,
    pub starred: bool,
    pub deleted_for_sender: bool,
    pub deleted_for_receiver: bool,
}

impl MailFlags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::Read => self.read,
            Flag::Spam => self.spam,
            Flag::Important => self.important,
            Flag::Starred => self.starred,
            Flag::DeletedForSender => self.deleted_for_sender,
            Flag::DeletedForReceiver => self.deleted_for_receiver,
        }
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Read => self.read = value,
            Flag::Spam => self.spam = value,
            Flag::Important => self.important = value,
            Flag::Starred => self.starred = value,
            Flag::DeletedForSender => self.deleted_for_sender = value,
            Flag::DeletedForReceiver => self.deleted_for_receiver = value,
        }
    }

    pub fn deleted_for_both(&self) -> bool {
        self.deleted_for_sender && self.deleted_for_receiver
    }
}

/// Which side of a mail the current user is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Sender,
    Receiver,
}

impl Side {
    pub fn labels_column(&self) -> &'static str {
        match self {
            Side::Sender => "labels_for_sender",
            Side::Receiver => "labels_for_receiver",
        }
    }

    pub fn deleted_flag(&self) -> Flag {
        match self {
            Side::Sender => Flag::DeletedForSender,
            Side::Receiver => Flag::DeletedForReceiver,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub state: MailState,
    pub flags: MailFlags,
    pub labels_for_sender: LabelIds,
    pub labels_for_receiver: LabelIds,
}

impl Mail {
    /// The viewer is the sender when their address matches `from`.
    pub fn side_for(&self, viewer_email: Option<&str>) -> Side {
        match viewer_email {
            Some(email) if email.eq_ignore_ascii_case(&self.from) => Side::Sender,
            _ => Side::Receiver,
        }
    }

    pub fn labels(&self, side: Side) -> &LabelIds {
        match side {
            Side::Sender => &self.labels_for_sender,
            Side::Receiver => &self.labels_for_receiver,
        }
    }

    pub fn labels_mut(&mut self, side: Side) -> &mut LabelIds {
        match side {
            Side::Sender => &mut self.labels_for_sender,
            Side::Receiver => &mut self.labels_for_receiver,
        }
    }
}

/// Editable part of a mail, as held by a composer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftContent {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl DraftContent {
    pub fn new(to: &str, subject: &str, body: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to.trim().is_empty() && self.subject.trim().is_empty() && self.body.trim().is_empty()
    }
}

impl From<&Mail> for DraftContent {
    fn from(mail: &Mail) -> Self {
        Self::new(&mail.to, &mail.subject, &mail.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    /// Id of the owning user, when the server reports it.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub display_name: String,
}

impl Label {
    pub fn new(id: &str, name: &str, owner: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            owner: owner.map(str::to_string),
            display_name: to_title_case(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub email_address: String,
    /// Opaque reference to the profile picture.
    pub profile_image: Option<String>,
}

/// A named mail partition that has its own cached snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Inbox,
    Sent,
    Drafts,
    Spam,
    Starred,
    Important,
    Trash,
    Label(String),
}

impl Category {
    pub const FIXED: [Category; 7] = [
        Category::Inbox,
        Category::Sent,
        Category::Drafts,
        Category::Spam,
        Category::Starred,
        Category::Important,
        Category::Trash,
    ];

    /// Key used for category membership rows.
    pub fn key(&self) -> String {
        match self {
            Category::Inbox => "inbox".to_string(),
            Category::Sent => "sent".to_string(),
            Category::Drafts => "drafts".to_string(),
            Category::Spam => "spam".to_string(),
            Category::Starred => "starred".to_string(),
            Category::Important => "important".to_string(),
            Category::Trash => "trash".to_string(),
            Category::Label(id) => format!("label:{id}"),
        }
    }

    /// The flag a mail must carry to be listed here, for categories that
    /// are defined by one.
    pub fn flag(&self) -> Option<Flag> {
        match self {
            Category::Spam => Some(Flag::Spam),
            Category::Starred => Some(Flag::Starred),
            Category::Important => Some(Flag::Important),
            _ => None,
        }
    }

    pub fn parse(key: &str) -> Result<Self> {
        let category = match key.trim().to_lowercase().as_str() {
            "inbox" => Category::Inbox,
            "sent" => Category::Sent,
            "drafts" => Category::Drafts,
            "spam" => Category::Spam,
            "starred" => Category::Starred,
            "important" => Category::Important,
            "trash" | "deleted" => Category::Trash,
            _ => match key.trim().strip_prefix("label:") {
                Some(id) if !id.is_empty() => Category::Label(id.to_string()),
                _ => return Err(Error::validation(format!("unknown category {key:?}"))),
            },
        };
        Ok(category)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
