//! `sentinel watch`

use crate::sentinel;
use anyhow::Result;
use std::time::Duration;
use tempfile::TempDir;

fn mentions(lines: &[String], name: &str) -> bool {
    lines.iter().any(|line| {
        serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|value| value["events"].as_array().cloned())
            .map(|events| events.iter().any(|e| e["file"] == name))
            .unwrap_or(false)
    })
}

#[test]
fn test_watch_reports_new_file_as_json() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let watched = temp_dir.path().join("watched");
    std::fs::create_dir(&watched)?;

    let running = sentinel!(
        temp_dir.path(),
        "watch",
        "watched",
        "--json",
        "--debounce-ms",
        "50"
    )
    .spawn()?;

    // Keep writing until the backend is up and reports the file
    let mut lines = Vec::new();
    for attempt in 0..20 {
        std::fs::write(watched.join("hello.txt"), format!("attempt {}", attempt))?;
        lines.extend(running.lines_until(Duration::from_millis(500), |l| mentions(l, "hello.txt")));
        if mentions(&lines, "hello.txt") {
            break;
        }
    }

    assert!(mentions(&lines, "hello.txt"), "no event for hello.txt in {:?}", lines);
    Ok(())
}

#[test]
fn test_watch_missing_directory_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let result = sentinel!(temp_dir.path(), "watch", "does-not-exist").assert_failure()?;
    assert!(result.contains_stderr("does-not-exist"));
    Ok(())
}

#[test]
fn test_watch_requires_a_path() -> Result<()> {
    let temp_dir = TempDir::new()?;
    sentinel!(temp_dir.path(), "watch").assert_failure()?;
    Ok(())
}
