use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

use super::{
    dto::{
        CommandResponse, ErrorBody, LocationStepRequest, SetHvacModeRequest, SetPresetModeRequest,
        SetTemperatureRequest,
    },
    errors::AppError,
    AppState,
};
use crate::{
    entities::{
        climate::{ClimateState, HvacMode, PresetMode},
        sensor::SensorState,
    },
    hub::{EntryState, EntrySummary},
    setup::{Credentials, FlowResult, LocationChoice},
};

// ---------------------------------------------------------------------------
// Config flow
// ---------------------------------------------------------------------------

/// Start a config flow with account credentials. The password is used for a
/// single login and never stored.
#[utoipa::path(
    post,
    path = "/setup/user",
    request_body = Credentials,
    responses(
        (status = 200, description = "Entry created, or a location choice is required", body = FlowResult),
        (status = 400, description = "invalid_auth", body = ErrorBody),
        (status = 409, description = "already_configured", body = ErrorBody),
        (status = 422, description = "no_locations / no_devices", body = ErrorBody),
        (status = 502, description = "cannot_connect", body = ErrorBody),
    ),
    tag = "setup"
)]
pub async fn setup_user(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<FlowResult>, AppError> {
    Ok(Json(state.flow.step_user(credentials).await?))
}

/// Finish a config flow by picking one of the offered locations.
#[utoipa::path(
    post,
    path = "/setup/location",
    request_body = LocationStepRequest,
    responses(
        (status = 200, description = "Entry created", body = FlowResult),
        (status = 400, description = "Location was not offered", body = ErrorBody),
        (status = 404, description = "Unknown or expired flow", body = ErrorBody),
        (status = 409, description = "already_configured", body = ErrorBody),
        (status = 422, description = "no_devices", body = ErrorBody),
    ),
    tag = "setup"
)]
pub async fn setup_location(
    State(state): State<AppState>,
    Json(req): Json<LocationStepRequest>,
) -> Result<Json<FlowResult>, AppError> {
    Ok(Json(state.flow.step_location(req.flow_id, req.location_id).await?))
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/entries",
    responses(
        (status = 200, description = "Configured entries, without secrets", body = Vec<EntrySummary>),
    ),
    tag = "entries"
)]
pub async fn list_entries(State(state): State<AppState>) -> Json<Vec<EntrySummary>> {
    Json(state.hub.entries().await)
}

/// Unload an entry and forget it.
#[utoipa::path(
    delete,
    path = "/entries/{entry_id}",
    params(("entry_id" = Uuid, Path, description = "Config entry id")),
    responses(
        (status = 204, description = "Entry removed"),
        (status = 404, description = "Unknown entry", body = ErrorBody),
    ),
    tag = "entries"
)]
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.hub.remove_entry(entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Tear the entry down and set it up again with its stored refresh token.
#[utoipa::path(
    post,
    path = "/entries/{entry_id}/reload",
    params(("entry_id" = Uuid, Path, description = "Config entry id")),
    responses(
        (status = 200, description = "Entry reloaded", body = EntrySummary),
        (status = 404, description = "Unknown entry", body = ErrorBody),
        (status = 502, description = "Setup failed", body = ErrorBody),
    ),
    tag = "entries"
)]
pub async fn reload_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<EntrySummary>, AppError> {
    state.hub.reload_entry(entry_id).await?;
    info!(%entry_id, "Entry reloaded on request");
    Ok(Json(state.hub.summary(entry_id).await?))
}

/// Replace an entry's refresh token using fresh credentials.
#[utoipa::path(
    post,
    path = "/entries/{entry_id}/reauth",
    params(("entry_id" = Uuid, Path, description = "Config entry id")),
    request_body = Credentials,
    responses(
        (status = 200, description = "reauth_successful", body = FlowResult),
        (status = 400, description = "invalid_auth", body = ErrorBody),
        (status = 404, description = "Unknown entry", body = ErrorBody),
        (status = 502, description = "cannot_connect", body = ErrorBody),
    ),
    tag = "entries"
)]
pub async fn reauth_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<FlowResult>, AppError> {
    Ok(Json(state.flow.step_reauth(entry_id, credentials).await?))
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/entries/{entry_id}/climate",
    params(("entry_id" = Uuid, Path, description = "Config entry id")),
    responses(
        (status = 200, description = "One climate entity per thermostat", body = Vec<ClimateState>),
        (status = 404, description = "Unknown entry", body = ErrorBody),
        (status = 503, description = "Entry not loaded", body = ErrorBody),
    ),
    tag = "entities"
)]
pub async fn get_climate(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Vec<ClimateState>>, AppError> {
    Ok(Json(state.hub.climates(entry_id).await?))
}

#[utoipa::path(
    get,
    path = "/entries/{entry_id}/sensors",
    params(("entry_id" = Uuid, Path, description = "Config entry id")),
    responses(
        (status = 200, description = "Four sensors per thermostat", body = Vec<SensorState>),
        (status = 404, description = "Unknown entry", body = ErrorBody),
        (status = 503, description = "Entry not loaded", body = ErrorBody),
    ),
    tag = "entities"
)]
pub async fn get_sensors(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Vec<SensorState>>, AppError> {
    Ok(Json(state.hub.sensors(entry_id).await?))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/entries/{entry_id}/devices/{device_id}/temperature",
    params(
        ("entry_id" = Uuid, Path, description = "Config entry id"),
        ("device_id" = i64, Path, description = "Thermostat id"),
    ),
    request_body = SetTemperatureRequest,
    responses(
        (status = 200, description = "Setpoint sent", body = CommandResponse),
        (status = 400, description = "Outside the device's range", body = ErrorBody),
        (status = 404, description = "Unknown entry or device", body = ErrorBody),
        (status = 502, description = "Upstream failure", body = ErrorBody),
    ),
    tag = "commands"
)]
pub async fn set_temperature(
    State(state): State<AppState>,
    Path((entry_id, device_id)): Path<(Uuid, i64)>,
    Json(req): Json<SetTemperatureRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    let commands = state.hub.commands(entry_id).await?;
    let temperature = commands.set_temperature(device_id, req.temperature).await?;
    Ok(Json(CommandResponse {
        temperature: Some(temperature),
        ..CommandResponse::for_device(device_id)
    }))
}

#[utoipa::path(
    post,
    path = "/entries/{entry_id}/devices/{device_id}/preset_mode",
    params(
        ("entry_id" = Uuid, Path, description = "Config entry id"),
        ("device_id" = i64, Path, description = "Thermostat id"),
    ),
    request_body = SetPresetModeRequest,
    responses(
        (status = 200, description = "Preset applied", body = CommandResponse),
        (status = 400, description = "Unknown preset", body = ErrorBody),
        (status = 404, description = "Unknown entry or device", body = ErrorBody),
        (status = 502, description = "Upstream failure", body = ErrorBody),
    ),
    tag = "commands"
)]
pub async fn set_preset_mode(
    State(state): State<AppState>,
    Path((entry_id, device_id)): Path<(Uuid, i64)>,
    Json(req): Json<SetPresetModeRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    let commands = state.hub.commands(entry_id).await?;
    let preset = commands.set_preset_mode(device_id, &req.preset_mode).await?;
    Ok(Json(CommandResponse {
        preset_mode: Some(preset),
        ..CommandResponse::for_device(device_id)
    }))
}

#[utoipa::path(
    post,
    path = "/entries/{entry_id}/devices/{device_id}/hvac_mode",
    params(
        ("entry_id" = Uuid, Path, description = "Config entry id"),
        ("device_id" = i64, Path, description = "Thermostat id"),
    ),
    request_body = SetHvacModeRequest,
    responses(
        (status = 200, description = "Mode applied", body = CommandResponse),
        (status = 404, description = "Unknown entry or device", body = ErrorBody),
        (status = 502, description = "Upstream failure", body = ErrorBody),
    ),
    tag = "commands"
)]
pub async fn set_hvac_mode(
    State(state): State<AppState>,
    Path((entry_id, device_id)): Path<(Uuid, i64)>,
    Json(req): Json<SetHvacModeRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    let commands = state.hub.commands(entry_id).await?;
    commands.set_hvac_mode(device_id, req.hvac_mode).await?;
    Ok(Json(CommandResponse {
        hvac_mode: Some(req.hvac_mode),
        ..CommandResponse::for_device(device_id)
    }))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        setup_user,
        setup_location,
        list_entries,
        delete_entry,
        reload_entry,
        reauth_entry,
        get_climate,
        get_sensors,
        set_temperature,
        set_preset_mode,
        set_hvac_mode,
        health,
    ),
    components(schemas(
        Credentials,
        LocationStepRequest,
        LocationChoice,
        FlowResult,
        EntrySummary,
        EntryState,
        ClimateState,
        SensorState,
        HvacMode,
        PresetMode,
        SetTemperatureRequest,
        SetPresetModeRequest,
        SetHvacModeRequest,
        CommandResponse,
        ErrorBody,
    )),
    tags(
        (name = "setup",    description = "Config flow"),
        (name = "entries",  description = "Config entry lifecycle"),
        (name = "entities", description = "Climate and sensor entities"),
        (name = "commands", description = "Thermostat commands"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Schluter Heat Service API",
        version = "0.1.0",
        description = "REST bridge for Schluter DITRA-HEAT-E-RS1 WiFi thermostats"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::{json, Value};

    use crate::{
        api::{router, AppState},
        hub::{
            tests::{hub_for, mock_healthy_account},
            Hub,
        },
        store::ConfigEntry,
    };

    fn test_server(hub: Hub) -> TestServer {
        TestServer::new(router(AppState::new(hub))).unwrap()
    }

    async fn mock_credential_login(server: &mut ServerGuard) {
        server
            .mock("POST", "/auth/login")
            .match_body(Matcher::PartialJson(json!({"email": "user@example.com"})))
            .with_status(200)
            .with_body(r#"{"refreshToken":"rt"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/auth/connect")
            .with_status(200)
            .with_body(r#"{"session":"sess-1"}"#)
            .create_async()
            .await;
    }

    /// A hub with one loaded entry for location 42 holding device 1.
    async fn loaded_hub(server: &mut ServerGuard) -> (Hub, String) {
        mock_healthy_account(server).await;
        let hub = hub_for(server).await;
        let summary = hub
            .add_entry(ConfigEntry::new(42, "Home", "rt".into()))
            .await
            .unwrap();
        (hub, summary.entry_id.to_string())
    }

    // -----------------------------------------------------------------------
    // System
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn health_returns_ok() {
        let server = Server::new_async().await;
        let api = test_server(hub_for(&server).await);
        let resp = api.get("/health").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let server = Server::new_async().await;
        let api = test_server(hub_for(&server).await);
        let resp = api.get("/api-docs/openapi.json").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["info"]["title"], "Schluter Heat Service API");
        assert!(body["paths"]["/entries/{entry_id}/climate"].is_object());
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn setup_user_creates_entry_without_exposing_secrets() {
        let mut server = Server::new_async().await;
        mock_credential_login(&mut server).await;
        mock_healthy_account(&mut server).await;
        server
            .mock("GET", "/api/location")
            .with_status(200)
            .with_body(r#"[{"id":42,"name":"Home"}]"#)
            .create_async()
            .await;
        let hub = hub_for(&server).await;
        let api = test_server(hub.clone());

        let resp = api
            .post("/setup/user")
            .json(&json!({"email": "user@example.com", "password": "hunter2"}))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["type"], "create_entry");
        assert_eq!(body["entry"]["state"], "loaded");

        let resp = api.get("/entries").await;
        resp.assert_status_ok();
        let text = resp.text();
        assert!(text.contains("Schluter Heat - Home"));
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("\"rt\""));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn setup_user_with_bad_password_is_400() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(401)
            .create_async()
            .await;
        let api = test_server(hub_for(&server).await);

        let resp = api
            .post("/setup/user")
            .json(&json!({"email": "user@example.com", "password": "wrong"}))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = resp.json();
        assert_eq!(body["error"], "invalid_auth");
    }

    #[tokio::test]
    async fn setup_location_with_unknown_flow_is_404() {
        let server = Server::new_async().await;
        let api = test_server(hub_for(&server).await);

        let resp = api
            .post("/setup/location")
            .json(&json!({"flow_id": uuid::Uuid::new_v4(), "location_id": 42}))
            .await;
        resp.assert_status(StatusCode::NOT_FOUND);
        let body: Value = resp.json();
        assert_eq!(body["error"], "unknown_flow");
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn climate_and_sensors_for_loaded_entry() {
        let mut server = Server::new_async().await;
        let (hub, entry_id) = loaded_hub(&mut server).await;
        let api = test_server(hub.clone());

        let resp = api.get(&format!("/entries/{entry_id}/climate")).await;
        resp.assert_status_ok();
        let body: Vec<Value> = resp.json();
        assert_eq!(body.len(), 1);
        assert_eq!(body[0]["unique_id"], "schluter_heat_1");
        assert_eq!(body[0]["hvac_mode"], "heat");
        assert_eq!(body[0]["hvac_action"], "heating");
        assert_eq!(body[0]["preset_mode"], "home");
        assert_eq!(body[0]["target_temperature"], 22.0);

        let resp = api.get(&format!("/entries/{entry_id}/sensors")).await;
        resp.assert_status_ok();
        let body: Vec<Value> = resp.json();
        assert_eq!(body.len(), 4);
        assert_eq!(body[0]["native_value"], 60.0);
        assert_eq!(body[2]["native_value"], "ok");
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_entry_is_404() {
        let server = Server::new_async().await;
        let api = test_server(hub_for(&server).await);

        let resp = api
            .get(&format!("/entries/{}/climate", uuid::Uuid::new_v4()))
            .await;
        resp.assert_status(StatusCode::NOT_FOUND);
        let body: Value = resp.json();
        assert_eq!(body["error"], "unknown_entry");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn set_temperature_snaps_and_sends() {
        let mut server = Server::new_async().await;
        let (hub, entry_id) = loaded_hub(&mut server).await;
        let put = server
            .mock("PUT", "/api/device/1/attribute")
            .match_body(Matcher::Json(json!({"roomSetpoint": 23.0})))
            .with_status(200)
            .with_body(r#"{"roomSetpoint":23.0}"#)
            .expect(1)
            .create_async()
            .await;
        let api = test_server(hub.clone());

        let resp = api
            .post(&format!("/entries/{entry_id}/devices/1/temperature"))
            .json(&json!({"temperature": 22.9}))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["temperature"], 23.0);
        put.assert_async().await;
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn set_temperature_out_of_range_is_400() {
        let mut server = Server::new_async().await;
        let (hub, entry_id) = loaded_hub(&mut server).await;
        let api = test_server(hub.clone());

        let resp = api
            .post(&format!("/entries/{entry_id}/devices/1/temperature"))
            .json(&json!({"temperature": 45.0}))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = resp.json();
        assert_eq!(body["error"], "validation");
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn command_for_unknown_device_is_404() {
        let mut server = Server::new_async().await;
        let (hub, entry_id) = loaded_hub(&mut server).await;
        let api = test_server(hub.clone());

        let resp = api
            .post(&format!("/entries/{entry_id}/devices/99/hvac_mode"))
            .json(&json!({"hvac_mode": "off"}))
            .await;
        resp.assert_status(StatusCode::NOT_FOUND);
        let body: Value = resp.json();
        assert_eq!(body["error"], "unknown_device");
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_preset_is_400() {
        let mut server = Server::new_async().await;
        let (hub, entry_id) = loaded_hub(&mut server).await;
        let api = test_server(hub.clone());

        let resp = api
            .post(&format!("/entries/{entry_id}/devices/1/preset_mode"))
            .json(&json!({"preset_mode": "boost"}))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn delete_entry_removes_it() {
        let mut server = Server::new_async().await;
        let (hub, entry_id) = loaded_hub(&mut server).await;
        let api = test_server(hub);

        api.delete(&format!("/entries/{entry_id}"))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        let body: Vec<Value> = api.get("/entries").await.json();
        assert!(body.is_empty());
        api.delete(&format!("/entries/{entry_id}"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
