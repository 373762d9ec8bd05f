use crate::db::Database;
use crate::error::Result;
use crate::models::Flag;

/// An optimistic cache write that can be reverted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    /// Flag was flipped before the remote confirmed it
    Flag {
        mail_id: String,
        flag: Flag,
        previous: bool,
    },
    /// Nothing was cached, so nothing was written
    Nothing,
}

impl Rollback {
    /// Applies `value` to the cached mail and remembers what it replaced.
    pub async fn apply_flag(db: &Database, mail_id: &str, flag: Flag, value: bool) -> Result<Self> {
        let Some(mail) = db.get_mail(mail_id).await? else {
            return Ok(Rollback::Nothing);
        };

        let previous = mail.flags.get(flag);
        db.set_flag(mail_id, flag, value).await?;
        Ok(Rollback::Flag {
            mail_id: mail_id.to_string(),
            flag,
            previous,
        })
    }

    pub async fn revert(&self, db: &Database) -> Result<()> {
        match self {
            Rollback::Flag {
                mail_id,
                flag,
                previous,
            } => {
                db.set_flag(mail_id, *flag, *previous).await?;
            }
            Rollback::Nothing => {}
        }
        Ok(())
    }

    pub fn description(&self) -> &'static str {
        match self {
            Rollback::Flag { flag, .. } => match flag {
                Flag::Read => "read state",
                Flag::Spam => "spam state",
                Flag::Important => "important state",
                Flag::Starred => "star",
                Flag::DeletedForSender | Flag::DeletedForReceiver => "delete",
            },
            Rollback::Nothing => "nothing",
        }
    }
}
