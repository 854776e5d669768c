//! `orbit --init`: write a default configuration file.

use orbit_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("  Config file already exists: {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("  Created {}", config_path.display());
    println!();
    println!("  Add your API key there, or set OPENROUTER_API_KEY.");
    println!("  Get an OpenRouter key at: https://openrouter.ai/keys");
    Ok(())
}
