//! Print the effective configuration

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(path: Option<&Path>) -> Result<()> {
    let config = super::load_config(path)?;
    let rendered = config
        .to_toml_string()
        .context("Failed to render configuration")?;

    let source = match path {
        Some(path) => path.display().to_string(),
        None => "built-in defaults".to_string(),
    };
    println!("{} {}\n", "# Source:".dimmed(), source.dimmed());
    print!("{}", rendered);
    Ok(())
}
