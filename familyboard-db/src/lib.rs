pub mod client;
pub mod feed;
pub mod local;
pub mod migrate;
mod record;
pub mod store;
