//! Path watching by periodic metadata comparison.

use super::ReactorHandle;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEvent {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

fn stamp(path: &Path) -> Option<Stamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some(Stamp {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

fn compare(before: Option<Stamp>, after: Option<Stamp>) -> Option<FsEvent> {
    match (before, after) {
        (None, Some(_)) => Some(FsEvent::Created),
        (Some(_), None) => Some(FsEvent::Removed),
        (Some(a), Some(b)) if a != b => Some(FsEvent::Modified),
        _ => None,
    }
}

/// Reports changes to one path. Dropping the watch stops it.
pub struct FsWatch {
    reactor: ReactorHandle,
    path: Option<PathBuf>,
    task: Option<JoinHandle<()>>,
}

impl FsWatch {
    pub(super) fn new(reactor: ReactorHandle) -> Self {
        Self {
            reactor,
            path: None,
            task: None,
        }
    }

    /// Check `path` every `interval`.
    ///
    /// The first snapshot is taken now, so only later changes are reported.
    pub fn start(
        &mut self,
        path: impl Into<PathBuf>,
        interval: Duration,
        mut callback: impl FnMut(FsEvent) + 'static,
    ) {
        self.stop();
        let path = path.into();
        let dispatch = self.reactor.dispatch();
        let mut last = stamp(&path);
        debug!("Watching {} every {:?}", path.display(), interval);

        let watched = path.clone();
        self.task = Some(self.reactor.spawn_local(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let current = stamp(&watched);
                if let Some(event) = compare(last, current) {
                    dispatch.run(|| callback(event));
                }
                last = current;
            }
        }));
        self.path = Some(path);
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.path = None;
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for FsWatch {
    fn drop(&mut self) {
        self.stop();
    }
}
