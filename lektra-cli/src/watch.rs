//! Reloads the open file after something else rewrites it.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

const SETTLE: Duration = Duration::from_millis(300);

/// Collapses bursts of change notifications into one reload.
#[derive(Debug, Default)]
pub struct ReloadDebounce {
    pending_since: Option<Instant>,
    ignore_until: Option<Instant>,
}

impl ReloadDebounce {
    pub fn changed(&mut self, now: Instant) {
        if self.ignore_until.is_some_and(|until| now < until) {
            return;
        }
        self.pending_since = Some(now);
    }

    /// Drops notifications caused by our own writes.
    pub fn suppress(&mut self, now: Instant, window: Duration) {
        self.ignore_until = Some(now + window);
        self.pending_since = None;
    }

    /// True once, when the last change is old enough.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.pending_since {
            Some(since) if now.duration_since(since) >= SETTLE => {
                self.pending_since = None;
                true
            }
            _ => false,
        }
    }
}

/// Passes on changes to `watched`; false when nothing was delivered.
fn forward_change(res: notify::Result<Event>, watched: &Path, tx: &Sender<()>) -> bool {
    let event = match res {
        Ok(event) => event,
        Err(err) => {
            warn!(?err, "file watch error");
            return false;
        }
    };
    let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event.paths.iter().any(|p| p == watched);
    if !relevant {
        return false;
    }
    if tx.send(()).is_err() {
        debug!("change after the viewer stopped listening");
        return false;
    }
    true
}

pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    changes: Receiver<()>,
    debounce: ReloadDebounce,
}

impl FileWatcher {
    /// Watches the parent directory so replace-by-rename saves are seen.
    pub fn new(path: &Path) -> Result<Self> {
        let target: PathBuf = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .context("watched file has no parent directory")?;
        let (tx, changes) = channel();
        let watched = target.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            forward_change(res, &watched, &tx);
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {:?}", dir))?;
        debug!(path = %target.display(), "watching for changes");
        Ok(Self {
            _watcher: watcher,
            changes,
            debounce: ReloadDebounce::default(),
        })
    }

    pub fn suppress(&mut self, window: Duration) {
        self.debounce.suppress(Instant::now(), window);
    }

    /// Drains notifications; true when a reload should happen now.
    pub fn poll(&mut self, now: Instant) -> bool {
        while let Ok(()) = self.changes.try_recv() {
            self.debounce.changed(now);
        }
        self.debounce.due(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursts_settle_into_one_reload() {
        let mut debounce = ReloadDebounce::default();
        let t0 = Instant::now();
        debounce.changed(t0);
        debounce.changed(t0 + Duration::from_millis(200));
        assert!(!debounce.due(t0 + Duration::from_millis(400)));
        assert!(debounce.due(t0 + Duration::from_millis(600)));
        assert!(!debounce.due(t0 + Duration::from_millis(900)));
    }

    #[test]
    fn only_changes_to_the_file_are_forwarded() {
        use notify::event::{CreateKind, ModifyKind};

        let watched = PathBuf::from("/docs/paper.pdf");
        let modify = |path: &str| {
            Ok(Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from(path)))
        };
        let (tx, rx) = channel();
        assert!(forward_change(modify("/docs/paper.pdf"), &watched, &tx));
        assert!(!forward_change(modify("/docs/other.pdf"), &watched, &tx));
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(watched.clone());
        assert!(forward_change(Ok(created), &watched, &tx));
        assert_eq!(rx.try_iter().count(), 2);

        drop(rx);
        assert!(!forward_change(modify("/docs/paper.pdf"), &watched, &tx));
    }

    #[test]
    fn own_writes_are_ignored() {
        let mut debounce = ReloadDebounce::default();
        let t0 = Instant::now();
        debounce.suppress(t0, Duration::from_secs(1));
        debounce.changed(t0 + Duration::from_millis(100));
        assert!(!debounce.due(t0 + Duration::from_secs(2)));
        debounce.changed(t0 + Duration::from_secs(3));
        assert!(debounce.due(t0 + Duration::from_secs(4)));
    }
}
