pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::{hub::Hub, setup::ConfigFlow};

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub flow: ConfigFlow,
}

impl AppState {
    pub fn new(hub: Hub) -> Self {
        let flow = ConfigFlow::new(hub.clone());
        Self { hub, flow }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/setup/user", post(handlers::setup_user))
        .route("/setup/location", post(handlers::setup_location))
        .route("/entries", get(handlers::list_entries))
        .route("/entries/{entry_id}", delete(handlers::delete_entry))
        .route("/entries/{entry_id}/reload", post(handlers::reload_entry))
        .route("/entries/{entry_id}/reauth", post(handlers::reauth_entry))
        .route("/entries/{entry_id}/climate", get(handlers::get_climate))
        .route("/entries/{entry_id}/sensors", get(handlers::get_sensors))
        .route(
            "/entries/{entry_id}/devices/{device_id}/temperature",
            post(handlers::set_temperature),
        )
        .route(
            "/entries/{entry_id}/devices/{device_id}/preset_mode",
            post(handlers::set_preset_mode),
        )
        .route(
            "/entries/{entry_id}/devices/{device_id}/hvac_mode",
            post(handlers::set_hvac_mode),
        )
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
