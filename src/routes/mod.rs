pub mod auth;
pub mod health;
pub mod internal;
pub mod threshold;

use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(threshold::router())
        .merge(internal::router())
}
