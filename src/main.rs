use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use chrono::{Local, TimeZone};
use smail_sync::api::ApiClient;
use smail_sync::auth::{RingStorage, SessionStore};
use smail_sync::config::Config;
use smail_sync::db::Database;
use smail_sync::label_repo::LabelRepository;
use smail_sync::mail_repo::MailRepository;
use smail_sync::models::Mail;
use smail_sync::remote::RemoteClient;
use smail_sync::user_repo::UserRepository;
use tracing::{Level, info, warn};

fn flag_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == name)
        .and_then(|i| args.get(i + 1).cloned())
}

fn format_date(ms: i64) -> String {
    match Local.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%b %d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

fn print_mails(title: &str, mails: &[Mail]) {
    println!("{} ({})", title, mails.len());
    for mail in mails.iter().take(10) {
        let marker = if mail.flags.read { ' ' } else { '*' };
        println!(
            "  {} {:<12} {:<28} {}",
            marker,
            format_date(mail.created_at),
            mail.from,
            mail.subject
        );
    }
}

fn read_password() -> anyhow::Result<String> {
    print!("password: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let debug_logging = args.iter().any(|arg| arg == "--debug");
    tracing_subscriber::fmt()
        .with_max_level(if debug_logging {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let db = Database::new(&config.database_url)
        .await
        .with_context(|| format!("cannot open {}", config.database_url))?;
    db.run_migrations().await?;

    let session: Arc<dyn SessionStore> = Arc::new(RingStorage::new(&config.keyring_service));
    let remote: Arc<dyn RemoteClient> = Arc::new(ApiClient::new(&config.api_base_url)?);
    let users = UserRepository::new(db.clone(), remote.clone(), session.clone());
    let mails = Arc::new(MailRepository::new(db.clone(), remote, session.clone()));
    let labels = LabelRepository::new(mails.clone());

    if args.iter().any(|arg| arg == "--logout") {
        users.logout().await?;
        println!("Logged out. Local cache cleared.");
        return Ok(());
    }

    if let Some(email) = flag_value(&args, "--login") {
        let password = read_password()?;
        let session = users.login(&email, &password).await?;
        println!("Logged in as {} ({})", session.full_name, session.email_address);
    }

    if session.load()?.is_none() {
        println!("Not logged in. Run with --login <email>.");
        return Ok(());
    }

    if let Some(query) = flag_value(&args, "--search") {
        let found = mails.search(&query).await?;
        print_mails(&format!("search {query:?}"), &found);
        return Ok(());
    }

    let categories = config.sync.categories();
    info!(count = categories.len(), "syncing categories");
    for (category, result) in mails.fetch_categories(&categories).await {
        match result {
            Ok(list) => print_mails(&category.key(), &list),
            Err(e) if e.is_unauthorized() => {
                warn!("session rejected, log in again");
                return Err(e.into());
            }
            Err(e) => warn!(%category, "sync failed: {e}"),
        }
    }

    match labels.refresh().await {
        Ok(list) => {
            for label in list {
                println!("label {} ({})", label.display_name, label.id);
            }
        }
        Err(e) => warn!("label refresh failed: {e}"),
    }

    Ok(())
}
