//! `codeloop sessions`: list and delete saved sessions.

use codeloop_config::AppConfig;
use codeloop_core::store::Store;
use codeloop_store::FileStore;

fn store() -> Result<FileStore, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(FileStore::new(config.sessions_dir()))
}

pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let store = store()?;
    let sessions = store.list().await?;

    if sessions.is_empty() {
        println!("No saved sessions in {}", store.dir().display());
        return Ok(());
    }

    println!("{:<38} {:<17} {:>6} {:>9}  Title", "Id", "Updated", "Msgs", "Tokens");
    for s in &sessions {
        println!(
            "{:<38} {:<17} {:>6} {:>9}  {}",
            s.id.as_str(),
            s.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            s.message_count,
            s.total_tokens,
            s.title
        );
    }
    Ok(())
}

pub async fn delete(id: &str) -> Result<(), Box<dyn std::error::Error>> {
    store()?.delete(id).await?;
    println!("Deleted session {id}");
    Ok(())
}
