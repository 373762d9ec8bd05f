use smail_sync::config::Config;
use smail_sync::db::Database;
use smail_sync::models::LabelIds;
use sqlx::Row;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query>", args[0]);
        eprintln!("Search query matches against Sender or Subject.");
        std::process::exit(1);
    }

    let query = &args[1];
    let search_term = format!("%{}%", query);

    let config = Config::load();
    let db = Database::new(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let row = sqlx::query(
        "SELECT id, from_address, subject, created_at, state, labels_for_sender, labels_for_receiver
         FROM mails
         WHERE from_address LIKE ? OR subject LIKE ?
         ORDER BY created_at DESC
         LIMIT 1",
    )
    .bind(&search_term)
    .bind(&search_term)
    .fetch_optional(db.pool())
    .await?;

    let Some(row) = row else {
        println!("No mails found matching '{}'", query);
        return Ok(());
    };

    let id: String = row.get("id");
    let from: String = row.get("from_address");
    let subject: String = row.get("subject");
    let created_at: i64 = row.get("created_at");
    let state: String = row.get("state");
    let sender_raw: Option<String> = row.get("labels_for_sender");
    let receiver_raw: Option<String> = row.get("labels_for_receiver");

    println!("Found Mail:");
    println!("ID: {}", id);
    println!("From: {}", from);
    println!("Subject: {}", subject);
    println!("Created: {}", created_at);
    println!("State: {}", state);
    println!("Categories: {:?}", db.categories_of(&id).await?);
    println!(
        "--------------------------------------------------------------------------------"
    );
    println!("LABELS (Raw):");
    println!("sender:   {:?}", sender_raw);
    println!("receiver: {:?}", receiver_raw);
    println!("LABELS (Decoded):");
    println!("sender:   {:?}", LabelIds::from_storage(sender_raw.as_deref()));
    println!("receiver: {:?}", LabelIds::from_storage(receiver_raw.as_deref()));

    Ok(())
}
