use std::sync::Arc;

use crate::services::QueryEngine;

pub mod catalog;
pub mod query;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
}
