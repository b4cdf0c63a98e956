use crate::{
    feed::{SnapshotFeed, Subscription},
    record::PostRecord,
    store::{DbError, PostStore, Result, Snapshot, SnapshotCallback},
};
use async_trait::async_trait;
use familyboard_common::model::{
    Id,
    post::{ImageData, Post, PostContent, PostMarker},
};
use sqlx::{
    PgPool, query, query_as,
    postgres::{PgListener, PgPoolOptions},
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const CLOUD_IMAGE_LIMIT: usize = 300_000;

pub const POSTS_CHANNEL: &str = "blog_posts_changed";

const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct DbClient {
    pool: PgPool,
    feed: Arc<SnapshotFeed>,
    listener: JoinHandle<()>,
}

impl DbClient {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().connect(database_url).await?;
        sqlx::migrate!().run(&pool).await?;

        Self::new(pool).await
    }

    pub async fn new(pool: PgPool) -> Result<Self> {
        let feed = Arc::new(SnapshotFeed::new());
        feed.publish(fetch_posts(&pool).await?);

        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(POSTS_CHANNEL).await?;
        let source = PgChangeSource {
            listener,
            pool: pool.clone(),
        };
        let listener = tokio::spawn(follow_changes(
            source,
            Arc::clone(&feed),
            LISTEN_RETRY_DELAY,
        ));

        info!("Connected to the post database");
        Ok(Self {
            pool,
            feed,
            listener,
        })
    }

    async fn refresh(&self) -> Result<()> {
        self.feed.publish(fetch_posts(&self.pool).await?);
        Ok(())
    }
}

impl Drop for DbClient {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn fetch_posts(pool: &PgPool) -> Result<Vec<Post>> {
    let records = query_as!(
        PostRecord,
        "
        SELECT
            post_id,
            title,
            content,
            tags,
            pinned,
            image,
            created_at,
            updated_at
        FROM
            blog.posts
        ORDER BY
            pinned DESC,
            created_at DESC
        "
    )
    .fetch_all(pool)
    .await?;

    Ok(records.into_iter().map(Post::from).collect())
}

#[async_trait]
trait ChangeSource: Send {
    /// `Ok(None)` means the connection dropped and will be re-established.
    async fn next_change(&mut self) -> Result<Option<String>>;

    async fn fetch_all(&mut self) -> Result<Vec<Post>>;
}

struct PgChangeSource {
    listener: PgListener,
    pool: PgPool,
}

#[async_trait]
impl ChangeSource for PgChangeSource {
    async fn next_change(&mut self) -> Result<Option<String>> {
        let notification = self.listener.try_recv().await?;
        Ok(notification.map(|notification| notification.payload().to_owned()))
    }

    async fn fetch_all(&mut self) -> Result<Vec<Post>> {
        fetch_posts(&self.pool).await
    }
}

// Notifications sent while disconnected are lost, so every wake-up re-reads everything.
async fn follow_changes(
    mut source: impl ChangeSource,
    feed: Arc<SnapshotFeed>,
    retry_delay: Duration,
) {
    loop {
        match source.next_change().await {
            Ok(Some(operation)) => debug!(%operation, "Posts changed remotely"),
            Ok(None) => warn!("Post change listener lost its connection, reconnecting"),
            Err(err) => {
                error!(error = %err, "Listening for post changes failed, retrying");
                tokio::time::sleep(retry_delay).await;
            }
        }

        match source.fetch_all().await {
            Ok(posts) => feed.publish(posts),
            Err(err) => error!(error = %err, "Re-reading posts failed"),
        }
    }
}

#[async_trait]
impl PostStore for DbClient {
    fn image_limit(&self) -> usize {
        CLOUD_IMAGE_LIMIT
    }

    async fn list(&self) -> Result<Snapshot> {
        Ok(self.feed.current())
    }

    async fn fetch(&self, id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as!(
            PostRecord,
            "
            SELECT
                post_id,
                title,
                content,
                tags,
                pinned,
                image,
                created_at,
                updated_at
            FROM
                blog.posts
            WHERE
                post_id = $1
            ",
            id.uuid(),
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Post::from))
    }

    fn subscribe(&self, callback: SnapshotCallback) -> Subscription {
        self.feed.subscribe(callback)
    }

    async fn create(&self, post: &PostContent) -> Result<Post> {
        let record = query_as!(
            PostRecord,
            "
            INSERT INTO
                blog.posts (post_id, title, content, tags, pinned, image, created_at, updated_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, now(), now())
            RETURNING
                post_id,
                title,
                content,
                tags,
                pinned,
                image,
                created_at,
                updated_at
            ",
            Id::<PostMarker>::generate().uuid(),
            post.title.get(),
            post.content.as_str(),
            &post.tags[..],
            post.pinned,
            post.image.as_ref().map(ImageData::get),
        )
        .fetch_one(&self.pool)
        .await?;

        self.refresh().await?;
        Ok(record.into())
    }

    async fn update(&self, id: Id<PostMarker>, post: &PostContent) -> Result<Post> {
        let record = query_as!(
            PostRecord,
            "
            UPDATE
                blog.posts
            SET
                title = $2,
                content = $3,
                tags = $4,
                pinned = $5,
                image = $6,
                updated_at = now()
            WHERE
                post_id = $1
            RETURNING
                post_id,
                title,
                content,
                tags,
                pinned,
                image,
                created_at,
                updated_at
            ",
            id.uuid(),
            post.title.get(),
            post.content.as_str(),
            &post.tags[..],
            post.pinned,
            post.image.as_ref().map(ImageData::get),
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::PostNotFound(id))?;

        self.refresh().await?;
        Ok(record.into())
    }

    async fn delete(&self, id: Id<PostMarker>) -> Result<()> {
        let deleted = query!(
            "
            DELETE FROM
                blog.posts
            WHERE
                post_id = $1
            ",
            id.uuid(),
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted == 0 {
            return Err(DbError::PostNotFound(id));
        }

        self.refresh().await
    }

    async fn import(&self, posts: &[Post]) -> Result<usize> {
        let mut transaction = self.pool.begin().await?;
        let mut imported = 0;

        for post in posts {
            imported += query!(
                "
                INSERT INTO
                    blog.posts (post_id, title, content, tags, pinned, image, created_at, updated_at)
                VALUES
                    ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (post_id) DO NOTHING
                ",
                post.id.uuid(),
                post.title.as_str(),
                post.content.as_str(),
                &post.tags[..],
                post.pinned,
                post.image.as_deref(),
                post.created_at,
                post.updated_at,
            )
            .execute(&mut *transaction)
            .await?
            .rows_affected();
        }

        transaction.commit().await?;
        self.refresh().await?;

        Ok(usize::try_from(imported).unwrap_or(usize::MAX))
    }
}
