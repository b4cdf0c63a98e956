use crate::server::{
    Result, ServerError, ServerRouter,
    extract::{Json, Query},
};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use axum_extra::routing::{RouterExt, TypedPath};
use familyboard_common::{
    model::{
        Id,
        post::{Post, PostDraft, PostMarker},
    },
    view::{PostsView, RenderedPost, ViewControls, build_view, render_preview},
};
use familyboard_db::store::{PostStore, Snapshot};
use futures::{Stream, stream};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub fn routes() -> ServerRouter {
    Router::new()
        .typed_get(view_posts)
        .typed_get(stream_posts)
        .typed_get(get_post)
        .typed_put(update_post)
        .typed_delete(delete_post)
        .typed_get(get_post_draft)
        .typed_post(create_post)
        .typed_post(preview_post)
}

#[derive(TypedPath)]
#[typed_path("/posts")]
struct PostsPath;

async fn view_posts(
    _: PostsPath,
    State(store): State<Arc<dyn PostStore>>,
    Query(controls): Query<ViewControls>,
) -> Result<Json<PostsView>> {
    let posts = store.list().await?;

    Ok(Json(build_view(&posts, &controls)))
}

#[derive(TypedPath)]
#[typed_path("/posts/stream")]
struct StreamPostsPath;

/// Sends a freshly built view every time the collection changes.
async fn stream_posts(
    _: StreamPostsPath,
    State(store): State<Arc<dyn PostStore>>,
    Query(controls): Query<ViewControls>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (sender, receiver) = mpsc::unbounded_channel::<Snapshot>();
    let subscription = store.subscribe(Box::new(move |snapshot: Snapshot| {
        // Fails only once the client is gone and the stream with it.
        let _ = sender.send(snapshot);
    }));
    debug!(?controls, "Client subscribed to post views");

    let views = stream::unfold(
        (receiver, subscription),
        move |(mut receiver, subscription)| {
            let controls = controls.clone();
            async move {
                let snapshot = receiver.recv().await?;
                let event = Event::default()
                    .event("view")
                    .json_data(build_view(&snapshot, &controls));
                Some((event, (receiver, subscription)))
            }
        },
    );

    Sse::new(views).keep_alive(KeepAlive::default())
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

async fn get_post(
    PostPath { id }: PostPath,
    State(store): State<Arc<dyn PostStore>>,
) -> Result<Json<Post>> {
    let post = store
        .fetch(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

async fn update_post(
    PostPath { id }: PostPath,
    State(store): State<Arc<dyn PostStore>>,
    Json(draft): Json<PostDraft>,
) -> Result<Json<Post>> {
    let content = draft.validate(store.image_limit())?;
    let post = store.update(id, &content).await?;

    info!(%id, "Updated post");
    Ok(Json(post))
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(store): State<Arc<dyn PostStore>>,
) -> Result<StatusCode> {
    store.delete(id).await?;

    info!(%id, "Deleted post");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/draft", rejection(ServerError))]
struct PostDraftPath {
    id: Id<PostMarker>,
}

async fn get_post_draft(
    PostDraftPath { id }: PostDraftPath,
    State(store): State<Arc<dyn PostStore>>,
) -> Result<Json<PostDraft>> {
    let post = store
        .fetch(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(PostDraft::from_post(&post)))
}

#[derive(TypedPath)]
#[typed_path("/posts/create")]
struct CreatePostPath;

async fn create_post(
    _: CreatePostPath,
    State(store): State<Arc<dyn PostStore>>,
    Json(draft): Json<PostDraft>,
) -> Result<Json<Post>> {
    let content = draft.validate(store.image_limit())?;
    let post = store.create(&content).await?;

    info!(id = %post.id, "Created post");
    Ok(Json(post))
}

#[derive(TypedPath)]
#[typed_path("/posts/preview")]
struct PreviewPostPath;

async fn preview_post(
    _: PreviewPostPath,
    Json(draft): Json<PostDraft>,
) -> Json<RenderedPost> {
    Json(render_preview(&draft))
}

#[cfg(test)]
mod tests {
    use crate::server::{ErrorResponse, ServerState, routes};
    use axum::{
        Router,
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use familyboard_common::{
        model::post::{Post, PostDraft},
        view::{PostsView, RenderedPost},
    };
    use familyboard_db::{local::LocalStore, store::PostStore};
    use http_body_util::BodyExt;
    use serde::de::DeserializeOwned;
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use tempfile::TempDir;
    use tokio::time::timeout;
    use tower::ServiceExt;

    async fn app_with_store(dir: &TempDir) -> (Router, Arc<LocalStore>) {
        let store = Arc::new(LocalStore::open(dir.path().join("posts.json")).await.unwrap());
        let app = routes().with_state(ServerState {
            store: store.clone(),
        });
        (app, store)
    }

    async fn app(dir: &TempDir) -> Router {
        app_with_store(dir).await.0
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    async fn create(app: &Router, title: &str, tags: &str, pinned: bool) -> Post {
        let draft = json!({ "title": title, "content": "Some **bold** text", "tags": tags, "pinned": pinned });
        let (status, body) = send(app, Method::POST, "/posts/create", Some(draft)).await;
        assert_eq!(status, StatusCode::OK);
        parse(&body)
    }

    #[tokio::test]
    async fn created_posts_show_up_in_the_view() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        let home = create(&app, "Garden plans", "home, garden", false).await;
        create(&app, "Taxes", "office", true).await;

        let (status, body) = send(&app, Method::GET, "/posts", None).await;
        assert_eq!(status, StatusCode::OK);
        let view: PostsView = parse(&body);
        assert!(!view.empty);
        assert_eq!(view.posts.len(), 2);
        assert_eq!(view.posts[0].title, "Taxes");
        assert_eq!(view.tags, ["garden", "home", "office"]);

        let (_, body) = send(&app, Method::GET, "/posts?tag=HOME&sort=title", None).await;
        let view: PostsView = parse(&body);
        assert_eq!(view.posts.len(), 1);
        assert_eq!(view.posts[0].id, Some(home.id));
        assert_eq!(
            view.posts[0].content_html,
            "<p>Some <strong>bold</strong> text</p>"
        );

        let (_, body) = send(&app, Method::GET, "/posts?q=nothing", None).await;
        let view: PostsView = parse(&body);
        assert!(view.empty);
    }

    #[tokio::test]
    async fn edit_cycle() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        let post = create(&app, "Draft", "", false).await;
        let uri = format!("/posts/{}", post.id);

        let (status, body) = send(&app, Method::GET, &format!("{uri}/draft"), None).await;
        assert_eq!(status, StatusCode::OK);
        let mut draft: Value = parse(&body);
        assert_eq!(draft["title"], "Draft");
        draft["title"] = json!("Final");

        let (status, body) = send(&app, Method::PUT, &uri, Some(draft)).await;
        assert_eq!(status, StatusCode::OK);
        let updated: Post = parse(&body);
        assert_eq!(updated.title, "Final");
        assert_eq!(updated.created_at, post.created_at);

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: ErrorResponse = parse(&body);
        assert_eq!(error.status, 404);

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        let blank_title = json!({ "title": "  ", "content": "x" });
        let (status, _) = send(&app, Method::POST, "/posts/create", Some(blank_title)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let linked_image = json!({ "title": "Pic", "image": "https://example.com/a.png" });
        let (status, _) = send(&app, Method::POST, "/posts/create", Some(linked_image)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, Method::GET, "/posts?sort=random", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, "/posts/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::GET, "/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preview_renders_without_saving() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        let draft = json!({ "title": "<Hi>", "content": "# Head\n\n- a\n- b", "tags": "x" });
        let (status, body) = send(&app, Method::POST, "/posts/preview", Some(draft)).await;
        assert_eq!(status, StatusCode::OK);
        let preview: RenderedPost = parse(&body);
        assert_eq!(preview.title, "&lt;Hi&gt;");
        assert_eq!(
            preview.content_html,
            "<h1>Head</h1>\n<ul><li>a</li>\n<li>b</li></ul>"
        );

        let (_, body) = send(&app, Method::GET, "/posts", None).await;
        let view: PostsView = parse(&body);
        assert!(view.empty);
    }

    async fn next_view(body: &mut Body) -> PostsView {
        let frame = timeout(Duration::from_secs(5), body.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let bytes = frame.into_data().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();

        assert!(text.starts_with("event: view\n"), "{text}");
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        parse(data.as_bytes())
    }

    #[tokio::test]
    async fn stream_sends_a_filtered_view_on_every_change() {
        let dir = TempDir::new().unwrap();
        let (app, store) = app_with_store(&dir).await;

        let request = Request::builder()
            .uri("/posts/stream?q=garden")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut body = response.into_body();

        let initial = next_view(&mut body).await;
        assert!(initial.empty);

        let draft = |title: &str, tags: &str| {
            PostDraft {
                title: title.to_owned(),
                tags: tags.to_owned(),
                ..PostDraft::default()
            }
            .validate(store.image_limit())
            .unwrap()
        };

        store.create(&draft("Taxes", "office")).await.unwrap();
        let unrelated = next_view(&mut body).await;
        assert!(unrelated.empty);
        assert_eq!(unrelated.tags, ["office"]);

        let garden = store.create(&draft("Garden plans", "home")).await.unwrap();
        let matching = next_view(&mut body).await;
        assert_eq!(matching.posts.len(), 1);
        assert_eq!(matching.posts[0].id, Some(garden.id));
        assert_eq!(matching.tags, ["home", "office"]);
    }
}
