//! Rendering deliveries for the terminal

use owo_colors::OwoColorize;
use sentinel_watcher::{Event, EventKind, Notification, WatchId};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One JSON line per notification
#[derive(Serialize)]
struct JsonLine<'a> {
    watch: WatchId,
    root: Option<&'a Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<&'a [Event]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

pub struct Printer {
    json: bool,
    roots: HashMap<WatchId, PathBuf>,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            roots: HashMap::new(),
        }
    }

    pub fn add_root(&mut self, id: WatchId, root: PathBuf) {
        self.roots.insert(id, root);
    }

    /// Text to print for a notification, if any
    ///
    /// Start and stop results are logged by the command itself.
    pub fn render(&self, notification: &Notification) -> Option<String> {
        match notification {
            Notification::Events { watch, events } => Some(if self.json {
                self.json_line(*watch, Some(events), None)
            } else {
                events
                    .iter()
                    .map(render_event)
                    .collect::<Vec<_>>()
                    .join("\n")
            }),
            Notification::Error { watch, message } => Some(if self.json {
                self.json_line(*watch, None, Some(message))
            } else {
                let root = self
                    .roots
                    .get(watch)
                    .map(|r| r.display().to_string())
                    .unwrap_or_else(|| watch.to_string());
                format!("{} {}: {}", "error".red().bold(), root, message)
            }),
            Notification::Started { .. } | Notification::Stopped { .. } => None,
        }
    }

    fn json_line(&self, watch: WatchId, events: Option<&[Event]>, error: Option<&str>) -> String {
        let line = JsonLine {
            watch,
            root: self.roots.get(&watch).map(PathBuf::as_path),
            events,
            error,
        };
        serde_json::to_string(&line).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }
}

fn render_event(event: &Event) -> String {
    let label = format!("{:<8}", event.kind().as_str());
    let label = match event.kind() {
        EventKind::Created => label.green().to_string(),
        EventKind::Modified => label.yellow().to_string(),
        EventKind::Deleted => label.red().to_string(),
        EventKind::Renamed => label.cyan().to_string(),
    };

    match event.new_name() {
        Some(new_name) => format!(
            "{} {} {} {}",
            label,
            event.path().display(),
            "->".dimmed(),
            event.directory().join(new_name).display()
        ),
        None => format!("{} {}", label, event.path().display()),
    }
}
