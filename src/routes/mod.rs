pub mod api;
pub mod auth_middleware;

use std::sync::Arc;

use crate::collab::CollabService;
use crate::config::Config;
use crate::db::DocumentStore;

pub use api::create_api_routes;

/// Shared handles for every request
#[derive(Clone)]
pub struct AppState {
    pub collab: Arc<CollabService>,
    pub store: Arc<dyn DocumentStore>,
    pub config: Arc<Config>,
}
