//! `codeloop init`: first-time setup.

use codeloop_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    }

    let sessions_dir = config_dir.join("sessions");
    if !sessions_dir.exists() {
        std::fs::create_dir_all(&sessions_dir)?;
        println!("Created sessions directory: {}", sessions_dir.display());
    }

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually, or delete it and re-run `codeloop init`.");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set ANTHROPIC_API_KEY (or OPENAI_API_KEY with provider.kind = \"openai\")");
    println!("  2. Run `codeloop` inside a repository");
    Ok(())
}
