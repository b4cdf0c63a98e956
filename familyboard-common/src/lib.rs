pub mod escape;
pub mod markdown;
pub mod model;
pub mod view;
