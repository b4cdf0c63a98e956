use crate::{
    feed::{SnapshotFeed, Subscription},
    store::{DbError, PostStore, Result, Snapshot, SnapshotCallback, storage_order},
};
use async_trait::async_trait;
use familyboard_common::model::{
    Id,
    post::{Post, PostContent, PostMarker},
};
use serde_json::Value;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Browser-local storage is in the low megabytes per origin, shared by all posts.
pub const LOCAL_IMAGE_LIMIT: usize = 2_000_000;

#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    posts: Mutex<Vec<Post>>,
    feed: SnapshotFeed,
}

impl LocalStore {
    /// A missing file is an empty store; it is created by the first save.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut posts = read_posts(&path).await?;
        storage_order(&mut posts);
        info!(path = %path.display(), posts = posts.len(), "Opened local post store");

        let feed = SnapshotFeed::new();
        feed.publish(posts.clone());

        Ok(Self {
            path,
            posts: Mutex::new(posts),
            feed,
        })
    }

    async fn commit(&self, current: &mut Vec<Post>, mut posts: Vec<Post>) -> Result<()> {
        storage_order(&mut posts);
        write_posts(&self.path, &posts).await?;

        current.clone_from(&posts);
        self.feed.publish(posts);
        Ok(())
    }
}

async fn read_posts(path: &Path) -> Result<Vec<Post>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No local post file yet");
            return Ok(Vec::new());
        }
        Err(err) => return Err(DbError::LocalRead(err)),
    };

    let values: Vec<Value> = serde_json::from_slice(&bytes).map_err(DbError::LocalFormat)?;
    let posts = values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<Post>(value) {
            Ok(post) => Some(post),
            Err(err) => {
                warn!(index, error = %err, "Skipping unreadable local post");
                None
            }
        })
        .collect();

    Ok(posts)
}

async fn write_posts(path: &Path, posts: &[Post]) -> Result<()> {
    let json = serde_json::to_vec_pretty(posts).map_err(DbError::LocalFormat)?;

    let mut temporary = path.as_os_str().to_owned();
    temporary.push(".tmp");
    let temporary = PathBuf::from(temporary);

    tokio::fs::write(&temporary, json)
        .await
        .map_err(DbError::LocalWrite)?;
    tokio::fs::rename(&temporary, path)
        .await
        .map_err(DbError::LocalWrite)
}

#[async_trait]
impl PostStore for LocalStore {
    fn image_limit(&self) -> usize {
        LOCAL_IMAGE_LIMIT
    }

    async fn list(&self) -> Result<Snapshot> {
        Ok(self.feed.current())
    }

    fn subscribe(&self, callback: SnapshotCallback) -> Subscription {
        self.feed.subscribe(callback)
    }

    async fn create(&self, post: &PostContent) -> Result<Post> {
        let mut current = self.posts.lock().await;

        let created = Post::new(Id::generate(), post, OffsetDateTime::now_utc());
        let mut posts = current.clone();
        posts.push(created.clone());
        self.commit(&mut current, posts).await?;

        debug!(id = %created.id, "Created local post");
        Ok(created)
    }

    async fn update(&self, id: Id<PostMarker>, post: &PostContent) -> Result<Post> {
        let mut current = self.posts.lock().await;

        let mut posts = current.clone();
        let existing = posts
            .iter_mut()
            .find(|existing| existing.id == id)
            .ok_or(DbError::PostNotFound(id))?;
        existing.apply(post, OffsetDateTime::now_utc());
        let updated = existing.clone();
        self.commit(&mut current, posts).await?;

        debug!(%id, "Updated local post");
        Ok(updated)
    }

    async fn delete(&self, id: Id<PostMarker>) -> Result<()> {
        let mut current = self.posts.lock().await;

        let mut posts = current.clone();
        posts.retain(|post| post.id != id);
        if posts.len() == current.len() {
            return Err(DbError::PostNotFound(id));
        }
        self.commit(&mut current, posts).await?;

        debug!(%id, "Deleted local post");
        Ok(())
    }

    async fn import(&self, posts: &[Post]) -> Result<usize> {
        let mut current = self.posts.lock().await;

        let mut merged = current.clone();
        let mut imported = 0;
        for post in posts {
            if merged.iter().all(|existing| existing.id != post.id) {
                merged.push(post.clone());
                imported += 1;
            }
        }
        if imported > 0 {
            self.commit(&mut current, merged).await?;
        }

        Ok(imported)
    }
}
