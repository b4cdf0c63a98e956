use crate::store::{Snapshot, SnapshotCallback};
use familyboard_common::model::post::Post;
use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;

#[derive(Debug)]
pub struct SnapshotFeed {
    sender: watch::Sender<Snapshot>,
}

#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl SnapshotFeed {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Snapshot::from(Vec::new()));
        Self { sender }
    }

    #[must_use]
    pub fn current(&self) -> Snapshot {
        self.sender.borrow().clone()
    }

    pub fn publish(&self, posts: Vec<Post>) {
        let snapshot = Snapshot::from(posts);
        let changed = self.sender.send_if_modified(|current| {
            if current[..] == snapshot[..] {
                false
            } else {
                *current = snapshot;
                true
            }
        });

        if changed {
            debug!(posts = self.sender.borrow().len(), "Published post snapshot");
        }
    }

    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn subscribe(&self, callback: SnapshotCallback) -> Subscription {
        let mut receiver = self.sender.subscribe();

        let task = tokio::spawn(async move {
            loop {
                let snapshot = receiver.borrow_and_update().clone();
                callback(snapshot);

                if receiver.changed().await.is_err() {
                    break;
                }
            }
        });

        Subscription { task }
    }
}

impl Default for SnapshotFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
