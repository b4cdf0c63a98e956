use crate::{
    escape::escape_html,
    markdown::render_markdown,
    model::{
        Id,
        post::{DEFAULT_POST_TITLE, Post, PostDraft, PostMarker},
    },
};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashSet, str::FromStr};
use thiserror::Error;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]. [month]. [day]. [hour]:[minute]");

pub const PREVIEW_TIMESTAMP: &str = "Preview";

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Newest,
    Oldest,
    Title,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
#[error("Unknown sort mode: {0}")]
pub struct UnknownSortModeError(String);

impl FromStr for SortMode {
    type Err = UnknownSortModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "title" => Ok(Self::Title),
            other => Err(UnknownSortModeError(other.to_owned())),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewControls {
    pub q: String,
    pub tag: Option<String>,
    pub sort: SortMode,
}

impl ViewControls {
    fn query(&self) -> Option<String> {
        let query = self.q.trim();
        (!query.is_empty()).then(|| query.to_lowercase())
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref().filter(|tag| !tag.is_empty())
    }
}

/// A post ready to be placed on a page. Every field is safe to insert as HTML.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id<PostMarker>>,
    pub title: String,
    pub tags: Vec<String>,
    pub pinned: bool,
    pub image: Option<String>,
    pub timestamp: String,
    pub content_html: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
pub struct PostsView {
    pub posts: Vec<RenderedPost>,
    // Across the whole collection, not just the selected posts.
    pub tags: Vec<String>,
    pub empty: bool,
}

fn collate(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

#[must_use]
pub fn select_posts<'a>(posts: &'a [Post], controls: &ViewControls) -> Vec<&'a Post> {
    let query = controls.query();
    let tag = controls.tag();

    let mut selected: Vec<&Post> = posts
        .iter()
        .filter(|post| query.as_deref().is_none_or(|query| post.matches_query(query)))
        .filter(|post| tag.is_none_or(|tag| post.has_tag(tag)))
        .collect();

    selected.sort_by(|a, b| {
        b.pinned.cmp(&a.pinned).then_with(|| match controls.sort {
            SortMode::Newest => b.created_at.cmp(&a.created_at),
            SortMode::Oldest => a.created_at.cmp(&b.created_at),
            SortMode::Title => collate(a.display_title(), b.display_title()),
        })
    });

    selected
}

#[must_use]
pub fn collect_tags(posts: &[Post]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tags: Vec<String> = posts
        .iter()
        .flat_map(|post| &post.tags)
        .filter(|tag| seen.insert(tag.as_str()))
        .cloned()
        .collect();
    tags.sort_by(|a, b| collate(a, b));
    tags
}

#[must_use]
pub fn format_timestamp(timestamp: OffsetDateTime) -> String {
    if timestamp == OffsetDateTime::UNIX_EPOCH {
        return String::new();
    }
    timestamp.format(TIMESTAMP_FORMAT).unwrap_or_default()
}

#[must_use]
pub fn render_post(post: &Post) -> RenderedPost {
    RenderedPost {
        id: Some(post.id),
        title: escape_html(post.display_title()),
        tags: post.tags.iter().map(|tag| escape_html(tag)).collect(),
        pinned: post.pinned,
        image: post.image.as_deref().map(escape_html),
        timestamp: format_timestamp(post.created_at),
        content_html: render_markdown(&post.content),
    }
}

#[must_use]
pub fn render_preview(draft: &PostDraft) -> RenderedPost {
    let title = match draft.title.trim() {
        "" => DEFAULT_POST_TITLE,
        title => title,
    };

    RenderedPost {
        id: None,
        title: escape_html(title),
        tags: draft.tag_list().iter().map(|tag| escape_html(tag)).collect(),
        pinned: draft.pinned,
        image: draft
            .image
            .as_deref()
            .filter(|image| !image.is_empty())
            .map(escape_html),
        timestamp: PREVIEW_TIMESTAMP.to_owned(),
        content_html: render_markdown(&draft.content),
    }
}

#[must_use]
pub fn build_view(posts: &[Post], controls: &ViewControls) -> PostsView {
    let rendered: Vec<RenderedPost> = select_posts(posts, controls)
        .into_iter()
        .map(render_post)
        .collect();

    PostsView {
        empty: rendered.is_empty(),
        posts: rendered,
        tags: collect_tags(posts),
    }
}
