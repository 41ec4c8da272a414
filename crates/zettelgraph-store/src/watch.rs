//! Keeps a vault's graph in sync with changes made outside of it.
//!
//! Events are debounced, then the graph is rebuilt and handed to the
//! caller's callback. Dropping the [`VaultWatcher`] stops watching and joins
//! the worker thread.

use crate::{Vault, VaultError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use zettelgraph_graph::Graph;

pub struct VaultWatcher {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl VaultWatcher {
    pub fn spawn<F>(vault: Arc<Vault>, on_change: F) -> Result<Self, VaultError>
    where
        F: FnMut(Graph) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)?;
        watcher.watch(vault.root(), RecursiveMode::Recursive)?;
        tracing::info!(root = %vault.root().display(), "watching vault");

        let worker = thread::Builder::new()
            .name("zettelgraph-watch".into())
            .spawn(move || run(vault, rx, on_change))
            .map_err(VaultError::io("zettelgraph-watch"))?;

        Ok(Self {
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }
}

impl Drop for VaultWatcher {
    fn drop(&mut self) {
        // Dropping the watcher closes the channel, which ends the worker.
        self.watcher.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("watch worker panicked");
            }
        }
    }
}

fn run<F>(vault: Arc<Vault>, rx: Receiver<notify::Result<Event>>, mut on_change: F)
where
    F: FnMut(Graph),
{
    let debounce = Duration::from_millis(vault.config().watch_debounce_ms);
    let skip_hidden = vault.config().skip_hidden;

    while let Ok(first) = rx.recv() {
        let mut dirty = is_relevant(vault.root(), &first, skip_hidden);
        loop {
            match rx.recv_timeout(debounce) {
                Ok(event) => dirty |= is_relevant(vault.root(), &event, skip_hidden),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
        if !dirty {
            continue;
        }
        match vault.rebuild() {
            Ok(graph) => on_change(graph),
            Err(err) => tracing::warn!(error = %err, "rebuild after change failed"),
        }
    }
    tracing::debug!("watch channel closed");
}

fn is_relevant(root: &Path, event: &notify::Result<Event>, skip_hidden: bool) -> bool {
    let event = match event {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "watch error");
            return false;
        }
    };
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|path| !(skip_hidden && is_hidden(root, path)))
}

/// True when any component below `root` starts with a dot.
fn is_hidden(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| matches!(c, Component::Normal(name) if name.to_string_lossy().starts_with('.')))
}
