use axum::{routing::get, Router};

use crate::state::AppState;

pub mod arrears;
pub mod commissions;
pub mod credits;
pub mod furniture;
pub mod health;
pub mod payments;
pub mod properties;
pub mod tenants;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(tenants::router())
        .merge(properties::router())
        .merge(furniture::router())
        .merge(payments::router())
        .merge(credits::router())
        .merge(commissions::router())
        .merge(arrears::router())
}
