use std::collections::HashSet;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite};
use tracing::debug;

use crate::error::Result;
use crate::models::{Category, Flag, LabelIds, Mail, MailFlags, MailState, Side, User};

const MAIL_COLUMNS: &str = "m.id, m.from_address, m.to_address, m.subject, m.body, m.created_at, m.state, \
     m.is_read, m.is_spam, m.is_important, m.is_starred, m.deleted_for_sender, m.deleted_for_receiver, \
     m.labels_for_sender, m.labels_for_receiver";

/// Predicate for [`Database::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailQuery {
    All,
    Id(String),
    /// Mails the remote last reported for this category.
    Category(Category),
    Flag(Flag, bool),
    /// Mails carrying the label on either side.
    Label(String),
    State(MailState),
}

enum Bind {
    Text(String),
    Bool(bool),
}

impl MailQuery {
    fn filter(&self) -> (String, Option<Bind>) {
        match self {
            MailQuery::All => (String::new(), None),
            MailQuery::Id(id) => ("WHERE m.id = ?".to_string(), Some(Bind::Text(id.clone()))),
            MailQuery::Category(category) => (
                "WHERE m.id IN (SELECT mail_id FROM mail_categories WHERE category = ?)".to_string(),
                Some(Bind::Text(category.key())),
            ),
            MailQuery::Flag(flag, value) => (
                format!("WHERE m.{} = ?", flag.column()),
                Some(Bind::Bool(*value)),
            ),
            // Substring prefilter only: lists may be JSON or legacy comma
            // strings, so exact membership is checked after decoding.
            MailQuery::Label(label_id) => (
                "WHERE instr(m.labels_for_sender, ?1) > 0 OR instr(m.labels_for_receiver, ?1) > 0"
                    .to_string(),
                Some(Bind::Text(label_id.clone())),
            ),
            MailQuery::State(state) => (
                "WHERE m.state = ?".to_string(),
                Some(Bind::Text(state.as_str().to_string())),
            ),
        }
    }
}

/// Local cache of mails and users.
///
/// Category membership lives in its own table so that refreshing one
/// category never touches rows another category still points at.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    /// A private in-memory cache. One connection, so every query sees the
    /// same database.
    pub async fn in_memory() -> Result<Self> {
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        self.pool.execute(schema).await?;
        Ok(())
    }

    pub async fn upsert_mail(&self, mail: &Mail) -> Result<()> {
        upsert_with(&self.pool, mail).await
    }

    pub async fn upsert_mails(&self, mails: &[Mail]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for mail in mails {
            upsert_with(&mut *tx, mail).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Runs the predicate, newest first. Every call re-reads the store.
    pub async fn query(&self, query: &MailQuery) -> Result<Vec<Mail>> {
        let (filter, bind) = query.filter();
        let sql = format!("SELECT {MAIL_COLUMNS} FROM mails m {filter} ORDER BY m.created_at DESC, m.id ASC");

        let mut q = sqlx::query(&sql);
        q = match bind {
            Some(Bind::Text(value)) => q.bind(value),
            Some(Bind::Bool(value)) => q.bind(value),
            None => q,
        };

        let rows = q.fetch_all(&self.pool).await?;
        let mut mails = rows.iter().map(mail_from_row).collect::<Result<Vec<_>>>()?;
        if let MailQuery::Label(label_id) = query {
            mails.retain(|m| {
                m.labels_for_sender.contains(label_id) || m.labels_for_receiver.contains(label_id)
            });
        }
        Ok(mails)
    }

    pub async fn get_mail(&self, id: &str) -> Result<Option<Mail>> {
        let mut mails = self.query(&MailQuery::Id(id.to_string())).await?;
        Ok(mails.pop())
    }

    pub async fn delete_mail(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM mail_categories WHERE mail_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM mails WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["mail_categories", "category_snapshots", "mails", "users"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Makes `mails` the whole cached content of `category`.
    ///
    /// Rows that drop out of the category are purged only when no other
    /// category still holds them.
    pub async fn replace_category(&self, category: &Category, mails: &[Mail]) -> Result<()> {
        let key = category.key();
        let mut tx = self.pool.begin().await?;

        let previous: Vec<String> =
            sqlx::query_scalar("SELECT mail_id FROM mail_categories WHERE category = ?")
                .bind(&key)
                .fetch_all(&mut *tx)
                .await?;

        for mail in mails {
            upsert_with(&mut *tx, mail).await?;
        }

        sqlx::query("DELETE FROM mail_categories WHERE category = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;

        for mail in mails {
            sqlx::query("INSERT OR IGNORE INTO mail_categories (mail_id, category) VALUES (?, ?)")
                .bind(&mail.id)
                .bind(&key)
                .execute(&mut *tx)
                .await?;
        }

        let kept: HashSet<&str> = mails.iter().map(|m| m.id.as_str()).collect();
        let mut purged = 0;
        for id in previous.iter().filter(|id| !kept.contains(id.as_str())) {
            let done = sqlx::query(
                "DELETE FROM mails WHERE id = ?1
                 AND NOT EXISTS (SELECT 1 FROM mail_categories WHERE mail_id = ?1)",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
            purged += done.rows_affected();
        }

        sqlx::query(
            "INSERT INTO category_snapshots (category, fetched_at) VALUES (?, ?)
             ON CONFLICT(category) DO UPDATE SET fetched_at=excluded.fetched_at",
        )
        .bind(&key)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(category = %key, stored = mails.len(), purged, "replaced category snapshot");
        Ok(())
    }

    /// Whether `category` has been stored by [`Database::replace_category`],
    /// possibly with no mails in it.
    pub async fn has_snapshot(&self, category: &Category) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT fetched_at FROM category_snapshots WHERE category = ?")
                .bind(category.key())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    pub async fn add_to_category(&self, id: &str, category: &Category) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO mail_categories (mail_id, category) VALUES (?, ?)")
            .bind(id)
            .bind(category.key())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_from_category(&self, id: &str, category: &Category) -> Result<()> {
        sqlx::query("DELETE FROM mail_categories WHERE mail_id = ? AND category = ?")
            .bind(id)
            .bind(category.key())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn categories_of(&self, id: &str) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar(
            "SELECT category FROM mail_categories WHERE mail_id = ? ORDER BY category",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    /// Returns `false` when no cached row has this id.
    pub async fn set_flag(&self, id: &str, flag: Flag, value: bool) -> Result<bool> {
        let sql = format!("UPDATE mails SET {} = ? WHERE id = ?", flag.column());
        let done = sqlx::query(&sql)
            .bind(value)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    pub async fn set_state(&self, id: &str, state: MailState) -> Result<()> {
        sqlx::query("UPDATE mails SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_labels(&self, id: &str, side: Side, labels: &LabelIds) -> Result<()> {
        let sql = format!("UPDATE mails SET {} = ? WHERE id = ?", side.labels_column());
        sqlx::query(&sql)
            .bind(labels.to_storage()?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drops a deleted label from every cached mail and from the category
    /// table.
    pub async fn strip_label(&self, label_id: &str) -> Result<()> {
        let mails = self.query(&MailQuery::Label(label_id.to_string())).await?;
        let mut tx = self.pool.begin().await?;

        for mut mail in mails {
            mail.labels_for_sender.remove(label_id);
            mail.labels_for_receiver.remove(label_id);
            sqlx::query("UPDATE mails SET labels_for_sender = ?, labels_for_receiver = ? WHERE id = ?")
                .bind(mail.labels_for_sender.to_storage()?)
                .bind(mail.labels_for_receiver.to_storage()?)
                .bind(&mail.id)
                .execute(&mut *tx)
                .await?;
        }

        let key = Category::Label(label_id.to_string()).key();
        for table in ["mail_categories", "category_snapshots"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE category = ?"))
                .bind(&key)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, full_name, email_address, profile_image)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET full_name=excluded.full_name,
             email_address=excluded.email_address, profile_image=excluded.profile_image",
        )
        .bind(&user.id)
        .bind(&user.full_name)
        .bind(&user.email_address)
        .bind(&user.profile_image)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, full_name, email_address, profile_image FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(r) = row {
            Ok(Some(User {
                id: r.try_get(0)?,
                full_name: r.try_get(1)?,
                email_address: r.try_get(2)?,
                profile_image: r.try_get(3)?,
            }))
        } else {
            Ok(None)
        }
    }
}

async fn upsert_with<'e, E>(executor: E, mail: &Mail) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO mails (id, from_address, to_address, subject, body, created_at, state,
         is_read, is_spam, is_important, is_starred, deleted_for_sender, deleted_for_receiver,
         labels_for_sender, labels_for_receiver)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET from_address=excluded.from_address, to_address=excluded.to_address,
         subject=excluded.subject, body=excluded.body, created_at=excluded.created_at, state=excluded.state,
         is_read=excluded.is_read, is_spam=excluded.is_spam, is_important=excluded.is_important,
         is_starred=excluded.is_starred, deleted_for_sender=excluded.deleted_for_sender,
         deleted_for_receiver=excluded.deleted_for_receiver,
         labels_for_sender=excluded.labels_for_sender, labels_for_receiver=excluded.labels_for_receiver",
    )
    .bind(&mail.id)
    .bind(&mail.from)
    .bind(&mail.to)
    .bind(&mail.subject)
    .bind(&mail.body)
    .bind(mail.created_at)
    .bind(mail.state.as_str())
    .bind(mail.flags.read)
    .bind(mail.flags.spam)
    .bind(mail.flags.important)
    .bind(mail.flags.starred)
    .bind(mail.flags.deleted_for_sender)
    .bind(mail.flags.deleted_for_receiver)
    .bind(mail.labels_for_sender.to_storage()?)
    .bind(mail.labels_for_receiver.to_storage()?)
    .execute(executor)
    .await?;
    Ok(())
}

fn mail_from_row(row: &SqliteRow) -> Result<Mail> {
    let state: String = row.try_get(6)?;
    let labels_for_sender: Option<String> = row.try_get(13)?;
    let labels_for_receiver: Option<String> = row.try_get(14)?;

    Ok(Mail {
        id: row.try_get(0)?,
        from: row.try_get(1)?,
        to: row.try_get(2)?,
        subject: row.try_get(3)?,
        body: row.try_get(4)?,
        created_at: row.try_get(5)?,
        state: MailState::parse(&state)?,
        flags: MailFlags {
            read: row.try_get(7)?,
            spam: row.try_get(8)?,
            important: row.try_get(9)?,
            starred: row.try_get(10)?,
            deleted_for_sender: row.try_get(11)?,
            deleted_for_receiver: row.try_get(12)?,
        },
        labels_for_sender: LabelIds::from_storage(labels_for_sender.as_deref())?,
        labels_for_receiver: LabelIds::from_storage(labels_for_receiver.as_deref())?,
    })
}
