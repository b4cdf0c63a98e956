use familyboard_db::{
    client::DbClient,
    local::LocalStore,
    migrate::migrate_once,
    store::{DbError, PostStore, Snapshot},
};
use serde::Deserialize;
use server::ServerState;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("DATABASE_URL must be set to use the cloud post store")]
    MissingDatabaseUrl,
    #[error("Error opening post store: {0}")]
    Store(#[from] DbError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StoreKind {
    #[default]
    Local,
    Cloud,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    #[serde(default)]
    post_store: StoreKind,
    database_url: Option<String>,
    #[serde(default = "default_local_store_path")]
    local_store_path: PathBuf,
    #[serde(default)]
    migrate_local_posts: bool,
}

fn default_local_store_path() -> PathBuf {
    PathBuf::from("blog_posts.json")
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "familyboard_api=debug,\
                familyboard_db=debug,\
                familyboard_common=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn open_store(env: &Env) -> Result<Arc<dyn PostStore>, InitError> {
    match env.post_store {
        StoreKind::Local => Ok(Arc::new(LocalStore::open(&env.local_store_path).await?)),
        StoreKind::Cloud => {
            let database_url = env
                .database_url
                .as_deref()
                .ok_or(InitError::MissingDatabaseUrl)?;
            let cloud = DbClient::connect(database_url).await?;

            if env.migrate_local_posts {
                let local = LocalStore::open(&env.local_store_path).await?;
                migrate_once(&local, &cloud).await?;
            }

            Ok(Arc::new(cloud))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let store = open_store(&env).await?;
    info!(store = ?env.post_store, "Post store ready");

    let _subscription = store.subscribe(Box::new(|snapshot: Snapshot| {
        debug!(posts = snapshot.len(), "Post collection changed");
    }));

    let tracing_layer = TraceLayer::new_for_http();
    let app = server::routes()
        .with_state(ServerState { store })
        .layer(tracing_layer);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{Env, InitError, StoreKind, open_store};
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    fn env(dir: &TempDir, post_store: StoreKind) -> Env {
        Env {
            server_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_port: 0,
            post_store,
            database_url: None,
            local_store_path: dir.path().join("posts.json"),
            migrate_local_posts: false,
        }
    }

    #[tokio::test]
    async fn local_store_reads_the_local_file() {
        let dir = TempDir::new().unwrap();
        let env = env(&dir, StoreKind::Local);
        tokio::fs::write(&env.local_store_path, "not json").await.unwrap();

        assert!(open_store(&env).await.is_err());
    }

    #[tokio::test]
    async fn cloud_store_leaves_the_local_file_alone() {
        let dir = TempDir::new().unwrap();
        let env = env(&dir, StoreKind::Cloud);
        tokio::fs::write(&env.local_store_path, "not json").await.unwrap();

        assert!(matches!(
            open_store(&env).await,
            Err(InitError::MissingDatabaseUrl)
        ));
    }
}
