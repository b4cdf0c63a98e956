use crate::model::{Id, ModelValidationError};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;
use time::OffsetDateTime;

/// Shown in place of a title that is missing or blank.
pub const DEFAULT_POST_TITLE: &str = "Untitled";

const DATA_URI_PREFIX: &str = "data:";

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id<PostMarker>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "unset_timestamp", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default = "unset_timestamp", with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn unset_timestamp() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

impl Post {
    #[must_use]
    pub fn new(id: Id<PostMarker>, content: &PostContent, now: OffsetDateTime) -> Self {
        Self {
            id,
            title: content.title.get().to_owned(),
            content: content.content.clone(),
            tags: content.tags.clone(),
            pinned: content.pinned,
            image: content.image.clone().map(ImageData::into_inner),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, content: &PostContent, now: OffsetDateTime) {
        self.title = content.title.get().to_owned();
        self.content.clone_from(&content.content);
        self.tags.clone_from(&content.tags);
        self.pinned = content.pinned;
        self.image = content.image.clone().map(ImageData::into_inner);
        self.updated_at = now;
    }

    #[must_use]
    pub fn display_title(&self) -> &str {
        match self.title.trim() {
            "" => DEFAULT_POST_TITLE,
            title => title,
        }
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.tags.iter().any(|own| own.to_lowercase() == tag)
    }

    /// `query` must already be lowercase.
    #[must_use]
    pub fn matches_query(&self, query: &str) -> bool {
        self.title.to_lowercase().contains(query)
            || self.content.to_lowercase().contains(query)
            || self.tags.iter().any(|tag| tag.to_lowercase().contains(query))
    }

    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.title.trim().is_empty() {
            DEFAULT_POST_TITLE.clone_into(&mut self.title);
        }
        if self
            .image
            .as_deref()
            .is_some_and(|image| !image.starts_with(DATA_URI_PREFIX))
        {
            self.image = None;
        }
        self
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct PostTitle(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("A post needs a title")]
pub struct InvalidPostTitleError;

impl PostTitle {
    pub fn new(title: &str) -> Result<Self, InvalidPostTitleError> {
        match title.trim() {
            "" => Err(InvalidPostTitleError),
            title => Ok(Self(title.to_owned())),
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PostTitle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        PostTitle::new(&inner).map_err(|_| Error::invalid_value(Unexpected::Str(&inner), &"PostTitle"))
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct ImageData(String);

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum InvalidImageError {
    #[error("The image is not an embedded data URI")]
    NotDataUri,
    #[error("The image is too large for this store ({len} bytes, at most {limit} allowed)")]
    TooLarge { len: usize, limit: usize },
}

impl ImageData {
    pub fn new(image: String) -> Result<Self, InvalidImageError> {
        if image.starts_with(DATA_URI_PREFIX) {
            Ok(Self(image))
        } else {
            Err(InvalidImageError::NotDataUri)
        }
    }

    pub fn check_limit(&self, limit: usize) -> Result<(), InvalidImageError> {
        let len = self.0.len();
        if len > limit {
            Err(InvalidImageError::TooLarge { len, limit })
        } else {
            Ok(())
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for ImageData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        if inner.starts_with(DATA_URI_PREFIX) {
            Ok(Self(inner))
        } else {
            Err(Error::invalid_value(Unexpected::Str(&inner), &"ImageData"))
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct PostContent {
    pub title: PostTitle,
    pub content: String,
    pub tags: Vec<String>,
    pub pinned: bool,
    pub image: Option<ImageData>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    // Comma-separated
    pub tags: String,
    pub pinned: bool,
    pub image: Option<String>,
}

impl PostDraft {
    #[must_use]
    pub fn from_post(post: &Post) -> Self {
        Self {
            title: post.title.clone(),
            content: post.content.clone(),
            tags: post.tags.join(", "),
            pinned: post.pinned,
            image: post.image.clone(),
        }
    }

    #[must_use]
    pub fn tag_list(&self) -> Vec<String> {
        parse_tags(&self.tags)
    }

    pub fn validate(self, image_limit: usize) -> Result<PostContent, ModelValidationError> {
        let title = PostTitle::new(&self.title)?;
        let tags = parse_tags(&self.tags);
        let image = self
            .image
            .filter(|image| !image.is_empty())
            .map(ImageData::new)
            .transpose()?;
        if let Some(image) = &image {
            image.check_limit(image_limit)?;
        }

        Ok(PostContent {
            title,
            content: self.content,
            tags,
            pinned: self.pinned,
            image,
        })
    }
}

#[must_use]
pub fn parse_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
        .collect()
}
