use crate::feed::Subscription;
use async_trait::async_trait;
use familyboard_common::model::{
    Id, ModelValidationError,
    post::{Post, PostContent, PostMarker},
};
use std::sync::Arc;
use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

pub type Snapshot = Arc<[Post]>;

pub type SnapshotCallback = Box<dyn Fn(Snapshot) + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("Migrating the database failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Post with id {0} was not found.")]
    PostNotFound(Id<PostMarker>),
    #[error("Reading the local post file failed: {0}")]
    LocalRead(std::io::Error),
    #[error("Writing the local post file failed: {0}")]
    LocalWrite(std::io::Error),
    #[error("The local post file is not a JSON array: {0}")]
    LocalFormat(serde_json::Error),
}

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Largest embedded image, in bytes of data URI text, this store accepts.
    fn image_limit(&self) -> usize;

    async fn list(&self) -> Result<Snapshot>;

    async fn fetch(&self, id: Id<PostMarker>) -> Result<Option<Post>> {
        Ok(self.list().await?.iter().find(|post| post.id == id).cloned())
    }

    /// Calls `callback` with the current snapshot and then with every changed one,
    /// until the returned handle is dropped.
    fn subscribe(&self, callback: SnapshotCallback) -> Subscription;

    async fn create(&self, post: &PostContent) -> Result<Post>;

    async fn update(&self, id: Id<PostMarker>, post: &PostContent) -> Result<Post>;

    async fn delete(&self, id: Id<PostMarker>) -> Result<()>;

    async fn import(&self, posts: &[Post]) -> Result<usize>;
}

pub fn storage_order(posts: &mut [Post]) {
    posts.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}
