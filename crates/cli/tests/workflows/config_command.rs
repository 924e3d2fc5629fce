//! `sentinel config`

use crate::sentinel;
use anyhow::Result;
use tempfile::TempDir;

#[test]
fn test_config_prints_defaults() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let result = sentinel!(temp_dir.path(), "config").assert_success()?;

    assert!(result.contains_stdout("[watch]"));
    assert!(result.contains_stdout("debounce_ms"));
    assert!(result.contains_stdout("[pool]"));
    Ok(())
}

#[test]
fn test_config_reads_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    std::fs::write(
        temp_dir.path().join("sentinel.toml"),
        "[watch]\ndebounce_ms = 321\n",
    )?;

    let result =
        sentinel!(temp_dir.path(), "config", "--config", "sentinel.toml").assert_success()?;
    assert!(result.contains_stdout("debounce_ms = 321"));
    Ok(())
}

#[test]
fn test_config_rejects_bad_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    std::fs::write(temp_dir.path().join("bad.toml"), "[watch]\ndebounce_ms = \"soon\"\n")?;

    let result = sentinel!(temp_dir.path(), "config", "--config", "bad.toml").assert_failure()?;
    assert!(result.contains_stderr("bad.toml"));
    Ok(())
}
