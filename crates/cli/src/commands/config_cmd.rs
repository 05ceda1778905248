//! `ragstream config`: configuration management commands.

use ragstream_config::ClientConfig;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ClientConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.transport.api_key.is_some() {
        config.transport.api_key = Some("[REDACTED]".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("# {}", ClientConfig::config_dir().join("config.toml").display());
    println!("{toml_str}");
    Ok(())
}

pub async fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dir = ClientConfig::config_dir();
    let path = dir.join("config.toml");
    if path.exists() && !force {
        println!("  Config already exists at {}", path.display());
        println!("  Use --force to overwrite it.");
        return Ok(());
    }

    std::fs::create_dir_all(&dir)?;
    std::fs::write(&path, ClientConfig::default_toml())?;
    println!("  Wrote default config to {}", path.display());
    Ok(())
}
