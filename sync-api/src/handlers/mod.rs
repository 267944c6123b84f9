mod app;
mod cleanup;
mod sync;
mod webhook;

pub use app::{add_routes, AppState};
