use familyboard_common::model::post::Post;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub(crate) struct PostRecord {
    pub post_id: Uuid,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub pinned: bool,
    pub image: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<PostRecord> for Post {
    fn from(value: PostRecord) -> Self {
        let post = Self {
            id: value.post_id.into(),
            title: value.title,
            content: value.content,
            tags: value.tags,
            pinned: value.pinned,
            image: value.image,
            created_at: value.created_at,
            updated_at: value.updated_at,
        };

        let normalized = post.clone().normalized();
        if normalized != post {
            warn!(id = %post.id, "Post record had invalid fields, normalizing");
        }
        normalized
    }
}
