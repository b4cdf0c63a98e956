use crate::store::{PostStore, Result};
use familyboard_common::model::post::Post;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub const MIGRATION_LIMIT: usize = 50;

/// Copies up to [`MIGRATION_LIMIT`] posts from `source` into `target`, unless `target` has posts.
pub async fn migrate_once(source: &dyn PostStore, target: &dyn PostStore) -> Result<usize> {
    if !target.list().await?.is_empty() {
        debug!("Target store already has posts, not migrating");
        return Ok(0);
    }

    let legacy = source.list().await?;
    if legacy.is_empty() {
        debug!("No posts to migrate");
        return Ok(0);
    }

    let now = OffsetDateTime::now_utc();
    let image_limit = target.image_limit();
    let batch: Vec<Post> = legacy
        .iter()
        .take(MIGRATION_LIMIT)
        .cloned()
        .map(|post| prepare(post, now, image_limit))
        .collect();
    let imported = target.import(&batch).await?;

    info!(imported, available = legacy.len(), "Migrated posts");
    Ok(imported)
}

fn prepare(post: Post, now: OffsetDateTime, image_limit: usize) -> Post {
    let mut post = post.normalized();

    if post.created_at == OffsetDateTime::UNIX_EPOCH {
        post.created_at = now;
    }
    if post.updated_at == OffsetDateTime::UNIX_EPOCH {
        post.updated_at = now;
    }
    let image_len = post.image.as_ref().map_or(0, String::len);
    if image_len > image_limit {
        warn!(id = %post.id, len = image_len, limit = image_limit, "Dropping oversized image");
        post.image = None;
    }

    post
}

#[cfg(test)]
mod tests {
    use crate::{
        local::LocalStore,
        migrate::{MIGRATION_LIMIT, migrate_once},
        store::PostStore,
    };
    use familyboard_common::{
        model::{
            Id,
            post::{DEFAULT_POST_TITLE, Post, PostDraft},
        },
        view::format_timestamp,
    };
    use tempfile::TempDir;
    use time::{Duration, OffsetDateTime, macros::datetime};

    fn legacy_post(title: &str, minutes: i64) -> Post {
        let created_at = datetime!(2024-05-01 09:00 UTC) + Duration::minutes(minutes);
        Post {
            id: Id::generate(),
            title: title.to_owned(),
            content: "old".to_owned(),
            tags: vec!["legacy".to_owned()],
            pinned: false,
            image: Some("not a data uri".to_owned()),
            created_at,
            updated_at: created_at,
        }
    }

    async fn stores(dir: &TempDir) -> (LocalStore, LocalStore) {
        let source = LocalStore::open(dir.path().join("legacy.json")).await.unwrap();
        let target = LocalStore::open(dir.path().join("shared.json")).await.unwrap();
        (source, target)
    }

    #[tokio::test]
    async fn copies_normalized_posts_into_an_empty_store() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores(&dir).await;
        let untitled = legacy_post("", 0);
        source.import(&[untitled.clone()]).await.unwrap();

        assert_eq!(migrate_once(&source, &target).await.unwrap(), 1);

        let migrated = target.fetch(untitled.id).await.unwrap().unwrap();
        assert_eq!(migrated.title, DEFAULT_POST_TITLE);
        assert_eq!(migrated.image, None);
        assert_eq!(migrated.created_at, untitled.created_at);

        assert_eq!(migrate_once(&source, &target).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_timestamps_become_migration_time() {
        let dir = TempDir::new().unwrap();
        let (_, target) = stores(&dir).await;
        let legacy_path = dir.path().join("undated.json");
        tokio::fs::write(
            &legacy_path,
            r#"[{"id": "01234567-89ab-cdef-0123-456789abcdef", "title": "Old note", "content": "x"}]"#,
        )
        .await
        .unwrap();
        let source = LocalStore::open(&legacy_path).await.unwrap();
        let before = OffsetDateTime::now_utc();

        assert_eq!(migrate_once(&source, &target).await.unwrap(), 1);

        let migrated = &target.list().await.unwrap()[0];
        assert_eq!(migrated.title, "Old note");
        assert!(migrated.created_at >= before);
        assert!(migrated.updated_at >= before);
        assert!(!format_timestamp(migrated.created_at).is_empty());
    }

    #[tokio::test]
    async fn oversized_images_are_dropped() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores(&dir).await;
        let mut small = legacy_post("Small", 0);
        small.image = Some("data:image/png;base64,AAAA".to_owned());
        let mut large = legacy_post("Large", 1);
        large.image = Some(format!(
            "data:image/png;base64,{}",
            "A".repeat(target.image_limit())
        ));
        source.import(&[small.clone(), large.clone()]).await.unwrap();

        assert_eq!(migrate_once(&source, &target).await.unwrap(), 2);

        let small_copy = target.fetch(small.id).await.unwrap().unwrap();
        assert_eq!(small_copy.image, small.image);
        let large_copy = target.fetch(large.id).await.unwrap().unwrap();
        assert_eq!(large_copy.image, None);
        assert_eq!(large_copy.content, large.content);
    }

    #[tokio::test]
    async fn leaves_populated_store_alone() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores(&dir).await;
        source.import(&[legacy_post("Old", 0)]).await.unwrap();
        let draft = PostDraft {
            title: "Already here".to_owned(),
            ..PostDraft::default()
        };
        target.create(&draft.validate(1000).unwrap()).await.unwrap();

        assert_eq!(migrate_once(&source, &target).await.unwrap(), 0);
        assert_eq!(target.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn copies_at_most_the_limit() {
        let dir = TempDir::new().unwrap();
        let (source, target) = stores(&dir).await;
        let legacy: Vec<Post> = (0..60).map(|minute| legacy_post("Old", minute)).collect();
        source.import(&legacy).await.unwrap();

        assert_eq!(
            migrate_once(&source, &target).await.unwrap(),
            MIGRATION_LIMIT
        );
        assert_eq!(target.list().await.unwrap().len(), MIGRATION_LIMIT);
    }
}
