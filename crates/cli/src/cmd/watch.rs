//! Watch directories and print every delivery until Ctrl-C

use crate::output::Printer;
use anyhow::{anyhow, Context, Result};
use sentinel_watcher::{ChannelDispatch, Dispatch, Pool, Watch, WatchState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct WatchArgs {
    pub paths: Vec<PathBuf>,
    pub debounce_ms: Option<u64>,
    pub config: Option<PathBuf>,
    pub json: bool,
}

pub async fn run(args: WatchArgs) -> Result<()> {
    // 1. Resolve configuration, flags win over the file
    let mut config = super::load_config(args.config.as_deref())?;
    if let Some(debounce_ms) = args.debounce_ms {
        config.watch.debounce_ms = debounce_ms;
    }

    // 2. Pool and dispatch boundary
    let mut pool = Pool::new(&config.pool).context("Failed to start scheduling pool")?;
    let (dispatch, notifications) = ChannelDispatch::new();
    let dispatch: Arc<dyn Dispatch> = Arc::new(dispatch);

    // 3. One watch per path
    let mut watches = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        let root = path
            .canonicalize()
            .with_context(|| format!("Cannot watch {}", path.display()))?;
        let watch = Watch::new(&root, config.watch.clone(), Arc::clone(&dispatch))
            .with_context(|| format!("Failed to create watch for {}", root.display()))?;
        pool.register(&watch);
        watches.push(watch);
    }
    drop(dispatch);

    let mut printer = Printer::new(args.json);
    for watch in &watches {
        printer.add_root(watch.id(), watch.root().to_path_buf());
    }

    // 4. Print on a blocking thread; it ends once every watch is gone
    let printing = tokio::task::spawn_blocking(move || {
        for notification in notifications.iter() {
            if let Some(line) = printer.render(&notification) {
                println!("{}", line);
            }
        }
    });

    // 5. Start everything, then wait for Ctrl-C
    for watch in &watches {
        let completion = watch.start()?;
        tokio::task::spawn_blocking(move || completion.wait())
            .await
            .map_err(|e| anyhow!("start worker panicked: {}", e))?
            .with_context(|| format!("Failed to watch {}", watch.root().display()))?;
    }
    info!("Watching {} director{}", watches.len(), if watches.len() == 1 { "y" } else { "ies" });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    // 6. Stop watches, then the pool
    for watch in &watches {
        if !matches!(watch.state(), WatchState::Running | WatchState::Errored) {
            continue;
        }
        let completion = watch.stop()?;
        let stopped = tokio::task::spawn_blocking(move || completion.wait())
            .await
            .map_err(|e| anyhow!("stop worker panicked: {}", e))?;
        if let Err(e) = stopped {
            warn!("Failed to stop {}: {}", watch.root().display(), e);
        }
    }
    pool.shutdown();
    drop(pool);
    drop(watches);

    printing
        .await
        .map_err(|e| anyhow!("printer panicked: {}", e))?;
    Ok(())
}
