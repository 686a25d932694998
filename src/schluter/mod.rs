pub mod error;
pub mod models;

use std::{sync::Arc, time::Duration};

use reqwest::{header::HeaderMap, Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;

pub use self::error::{SchluterError, SchluterResult};
use self::models::{
    connect_session_id, sanitize, CredentialLogin, DeviceAttributes, DeviceListResponse,
    DeviceSummary, Location, OccupancyMode, SessionLogin, SetpointMode, SetpointResponse,
    ThermostatStatus, THERMOSTAT_ATTRIBUTES,
};

const SESSION_HEADER: &str = "session-id";

#[derive(Debug, Clone)]
pub struct SchluterClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
    auth_url: String,
    session: Mutex<Session>,
}

/// In-memory authentication state. Only `refresh_token` ever leaves the
/// process (through the entry store).
#[derive(Default)]
struct Session {
    refresh_token: Option<String>,
    session_id: Option<String>,
    access_token: Option<String>,
    user_id: Option<i64>,
    account_id: Option<i64>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("connected", &self.session_id.is_some())
            .field("user_id", &self.user_id)
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl SchluterClient {
    pub fn new(base_url: &str, auth_url: &str, timeout: Duration) -> SchluterResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchluterError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: with_trailing_slash(base_url),
                auth_url: with_trailing_slash(auth_url),
                session: Mutex::new(Session::default()),
            }),
        })
    }

    pub fn from_config(config: &Config) -> SchluterResult<Self> {
        Self::new(&config.base_url, &config.auth_url, config.request_timeout())
    }

    /// Exchange email + password for a long-lived refresh token.
    ///
    /// The password is only placed in the request body; it is never kept on
    /// the client and never logged.
    pub async fn login_with_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> SchluterResult<CredentialLogin> {
        let url = format!("{}login", self.inner.auth_url);
        let body = json!({
            "email": email,
            "password": password,
            "interface": "neviweb",
            "stayConnected": 1,
        });

        let data: Value = self
            .send(self.inner.http.post(&url).json(&body), "credential login")
            .await
            .map_err(into_auth_error)?;

        debug!(response = %sanitize(&data), "Credential login response");

        let login = CredentialLogin::from_response(&data).ok_or_else(|| {
            warn!(response = %sanitize(&data), "No refresh token in login response");
            SchluterError::Authentication("no refresh token received".to_owned())
        })?;

        let mut session = self.inner.session.lock().await;
        session.refresh_token = Some(login.refresh_token.clone());
        session.access_token = login.access_token.clone();
        session.user_id = login.user_id;
        session.account_id = login.account_id;
        info!(user_id = ?login.user_id, "Credential login successful");

        Ok(login)
    }

    /// Log in with a stored refresh token and keep the returned session id.
    pub async fn login(&self, refresh_token: &str) -> SchluterResult<()> {
        let url = format!("{}login", self.inner.auth_url);
        let body = json!({ "refreshToken": refresh_token });

        let data: Value = self
            .send(self.inner.http.post(&url).json(&body), "refresh token login")
            .await
            .map_err(into_auth_error)?;

        let login = SessionLogin::from_response(&data);
        let has_session = login.session_id.is_some();

        {
            let mut session = self.inner.session.lock().await;
            session.refresh_token = Some(refresh_token.to_owned());
            session.access_token = login.access_token;
            session.session_id = login.session_id;
            session.user_id = login.user_id;
            session.account_id = login.account_id;
        }
        info!(
            user_id = ?login.user_id,
            account_id = ?login.account_id,
            has_session,
            "Login successful"
        );

        // Older accounts get the session id from a separate connect call.
        if !has_session {
            self.connect().await?;
        }

        Ok(())
    }

    /// Obtain a session id from the refresh token held by this client.
    pub async fn connect(&self) -> SchluterResult<String> {
        let refresh_token = self
            .inner
            .session
            .lock()
            .await
            .refresh_token
            .clone()
            .ok_or_else(|| SchluterError::Authentication("must login first".to_owned()))?;

        let url = format!("{}connect", self.inner.auth_url);
        let data: Value = self
            .send(
                self.inner.http.post(&url).header("refreshToken", refresh_token),
                "connect",
            )
            .await
            .map_err(into_auth_error)?;

        let session_id = connect_session_id(&data).ok_or_else(|| {
            warn!(response = %sanitize(&data), "No session id in connect response");
            SchluterError::Authentication("no session id in connect response".to_owned())
        })?;

        self.inner.session.lock().await.session_id = Some(session_id.clone());
        info!("Connected, session established");
        Ok(session_id)
    }

    /// Fetch every location owned by the account.
    pub async fn get_locations(&self) -> SchluterResult<Vec<Location>> {
        let headers = self.session_headers().await?;
        let url = format!("{}location", self.inner.base_url);

        let data: Value = self
            .send(self.inner.http.get(&url).headers(headers), "get locations")
            .await?;

        if !data.is_array() {
            warn!("Unexpected locations response format, expected a list");
            return Ok(Vec::new());
        }
        let locations: Vec<Location> = serde_json::from_value(data)
            .map_err(|e| SchluterError::Api(format!("get locations: invalid response body: {e}")))?;
        info!(count = locations.len(), "Found locations");
        Ok(locations)
    }

    /// Fetch all devices at a location.
    pub async fn get_devices(&self, location_id: i64) -> SchluterResult<Vec<DeviceSummary>> {
        let headers = self.session_headers().await?;
        let url = self.data_url(
            "devices",
            &[
                ("includedLocationChildren", "true".to_owned()),
                ("location$id", location_id.to_string()),
            ],
        )?;
        debug!(location_id, "Fetching devices");

        let resp: DeviceListResponse = self
            .send(self.inner.http.get(url).headers(headers), "get devices")
            .await?;

        Ok(resp.devices)
    }

    /// Fetch the full attribute set of a thermostat.
    ///
    /// The name is a placeholder; callers replace it with the name from
    /// the device listing.
    pub async fn get_thermostat_status(&self, device_id: i64) -> SchluterResult<ThermostatStatus> {
        let headers = self.session_headers().await?;
        let url = self.data_url(
            &format!("device/{device_id}/attribute"),
            &[("attributes", THERMOSTAT_ATTRIBUTES.join(","))],
        )?;
        debug!(device_id, "Fetching thermostat status");

        let attrs: DeviceAttributes = self
            .send(self.inner.http.get(url).headers(headers), "get thermostat status")
            .await?;

        Ok(ThermostatStatus::from_attributes(
            device_id,
            format!("Device {device_id}"),
            attrs,
        ))
    }

    /// Set the target temperature in °C. Returns whether the API echoed the
    /// requested setpoint back.
    pub async fn set_temperature(&self, device_id: i64, temperature: f64) -> SchluterResult<bool> {
        let resp: SetpointResponse = self
            .put_attribute(device_id, json!({ "roomSetpoint": temperature }), "set temperature")
            .await?;

        if resp.room_setpoint == Some(temperature) {
            info!(device_id, temperature, "Set temperature");
            Ok(true)
        } else {
            warn!(
                device_id,
                requested = temperature,
                reported = ?resp.room_setpoint,
                "Temperature mismatch after set"
            );
            Ok(false)
        }
    }

    pub async fn set_mode(&self, device_id: i64, mode: SetpointMode) -> SchluterResult<()> {
        let _: Value = self
            .put_attribute(device_id, json!({ "setpointMode": mode.as_str() }), "set mode")
            .await?;
        info!(device_id, mode = %mode, "Set setpoint mode");
        Ok(())
    }

    pub async fn set_occupancy_mode(
        &self,
        device_id: i64,
        occupancy: OccupancyMode,
    ) -> SchluterResult<()> {
        let _: Value = self
            .put_attribute(
                device_id,
                json!({ "occupancyMode": occupancy.as_str() }),
                "set occupancy",
            )
            .await?;
        info!(device_id, occupancy = %occupancy, "Set occupancy mode");
        Ok(())
    }

    /// Drop the session locally. The refresh token stays usable.
    pub async fn logout(&self) {
        let mut session = self.inner.session.lock().await;
        if session.session_id.take().is_some() {
            session.access_token = None;
            info!("Logged out");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.session.lock().await.session_id.is_some()
    }

    async fn put_attribute<T: DeserializeOwned>(
        &self,
        device_id: i64,
        body: Value,
        what: &str,
    ) -> SchluterResult<T> {
        let headers = self.session_headers().await?;
        let url = format!("{}device/{}/attribute", self.inner.base_url, device_id);
        debug!(device_id, what, "Updating device attribute");

        self.send(self.inner.http.put(&url).headers(headers).json(&body), what)
            .await
    }

    fn data_url(&self, path: &str, params: &[(&str, String)]) -> SchluterResult<Url> {
        Url::parse_with_params(&format!("{}{}", self.inner.base_url, path), params)
            .map_err(|e| SchluterError::Api(format!("invalid request URL for {path}: {e}")))
    }

    async fn session_headers(&self) -> SchluterResult<HeaderMap> {
        let session_id = self
            .inner
            .session
            .lock()
            .await
            .session_id
            .clone()
            .ok_or_else(|| SchluterError::Authentication("not connected".to_owned()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            SESSION_HEADER,
            session_id
                .parse()
                .map_err(|_| SchluterError::Authentication("invalid session id".to_owned()))?,
        );
        Ok(headers)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> SchluterResult<T> {
        let bytes = req
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SchluterError::from_reqwest(what, e))?
            .error_for_status()
            .map_err(|e| SchluterError::from_reqwest(what, e))?
            .bytes()
            .await
            .map_err(|e| SchluterError::from_reqwest(what, e))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| SchluterError::Api(format!("{what}: invalid response body: {e}")))
    }
}

/// Auth endpoints reject bad credentials with a variety of statuses; treat
/// every non-transport failure there as an authentication problem.
fn into_auth_error(err: SchluterError) -> SchluterError {
    match err {
        SchluterError::Api(msg) => SchluterError::Authentication(msg),
        other => other,
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_owned()
    } else {
        format!("{url}/")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server, ServerGuard};

    use super::*;

    fn client(server: &ServerGuard) -> SchluterClient {
        SchluterClient::new(
            &format!("{}/api", server.url()),
            &format!("{}/auth/", server.url()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    async fn logged_in(server: &mut ServerGuard) -> SchluterClient {
        server
            .mock("POST", "/auth/login")
            .match_body(Matcher::Json(json!({ "refreshToken": "rt" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"session":"sess-1","user":{"id":1,"account$id":2}}"#)
            .create_async()
            .await;
        let c = client(server);
        c.login("rt").await.unwrap();
        c
    }

    #[test]
    fn trailing_slash_is_added_once() {
        assert_eq!(with_trailing_slash("http://x/api"), "http://x/api/");
        assert_eq!(with_trailing_slash("http://x/api/"), "http://x/api/");
    }

    #[tokio::test]
    async fn credential_login_returns_refresh_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/login")
            .match_body(Matcher::PartialJson(json!({
                "email": "me@example.com",
                "password": "pw",
                "interface": "neviweb",
                "stayConnected": 1
            })))
            .with_status(200)
            .with_body(r#"{"refreshToken":"rt-new","user":{"id":10,"account$id":20}}"#)
            .create_async()
            .await;

        let c = client(&server);
        let login = c.login_with_credentials("me@example.com", "pw").await.unwrap();

        assert_eq!(login.refresh_token, "rt-new");
        assert_eq!(login.user_id, Some(10));
        assert_eq!(login.account_id, Some(20));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn credential_login_rejected_is_auth_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(400)
            .with_body(r#"{"error":"bad credentials"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .login_with_credentials("me@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn credential_login_without_token_is_auth_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(r#"{"user":{"id":10}}"#)
            .create_async()
            .await;

        let err = client(&server)
            .login_with_credentials("me@example.com", "pw")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no refresh token"));
    }

    #[tokio::test]
    async fn login_without_session_falls_back_to_connect() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(r#"{"user":{"id":1}}"#)
            .create_async()
            .await;
        let connect = server
            .mock("POST", "/auth/connect")
            .match_header("refreshToken", "rt")
            .with_status(200)
            .with_body(r#"{"session":"sess-2"}"#)
            .create_async()
            .await;

        let c = client(&server);
        c.login("rt").await.unwrap();
        assert!(c.is_connected().await);
        connect.assert_async().await;
    }

    #[tokio::test]
    async fn connect_requires_login() {
        let server = Server::new_async().await;
        let err = client(&server).connect().await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn connect_sends_refresh_token_header() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(r#"{"refresh_token":"rt-9"}"#)
            .create_async()
            .await;
        let connect = server
            .mock("POST", "/auth/connect")
            .match_header("refreshToken", "rt-9")
            .with_status(200)
            .with_body(r#"{"sessionId":"sess-9"}"#)
            .create_async()
            .await;

        let c = client(&server);
        c.login_with_credentials("a@b.c", "pw").await.unwrap();
        assert_eq!(c.connect().await.unwrap(), "sess-9");
        assert!(c.is_connected().await);
        connect.assert_async().await;
    }

    #[tokio::test]
    async fn data_calls_without_session_are_auth_errors() {
        let server = Server::new_async().await;
        let err = client(&server).get_devices(1).await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn get_locations_uses_session_header() {
        let mut server = Server::new_async().await;
        let c = logged_in(&mut server).await;
        server
            .mock("GET", "/api/location")
            .match_header("session-id", "sess-1")
            .with_status(200)
            .with_body(r#"[{"id":103355,"name":"Home"},{"id":2}]"#)
            .create_async()
            .await;

        let locations = c.get_locations().await.unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].display_name(), "Home");
        assert_eq!(locations[1].display_name(), "Location 2");
    }

    #[tokio::test]
    async fn get_locations_non_list_is_empty() {
        let mut server = Server::new_async().await;
        let c = logged_in(&mut server).await;
        server
            .mock("GET", "/api/location")
            .with_status(200)
            .with_body(r#"{"unexpected":true}"#)
            .create_async()
            .await;

        assert!(c.get_locations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_devices_passes_location_query() {
        let mut server = Server::new_async().await;
        let c = logged_in(&mut server).await;
        let mock = server
            .mock("GET", "/api/devices")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("includedLocationChildren".into(), "true".into()),
                Matcher::UrlEncoded("location$id".into(), "103355".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"devices":[{"id":1001,"name":"Bathroom"},{"id":1002}]}"#)
            .create_async()
            .await;

        let devices = c.get_devices(103355).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].display_name(), "Device 1002");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_thermostat_status_parses_attributes() {
        let mut server = Server::new_async().await;
        let c = logged_in(&mut server).await;
        server
            .mock("GET", "/api/device/1001/attribute")
            .match_query(Matcher::UrlEncoded(
                "attributes".into(),
                THERMOSTAT_ATTRIBUTES.join(","),
            ))
            .with_status(200)
            .with_body(
                r#"{"roomSetpoint":21.5,"roomTemperatureDisplay":{"value":19.0,"status":"on"},
                    "outputPercentDisplay":{"percent":60},"setpointMode":"schedule","gfciStatus":"ok"}"#,
            )
            .create_async()
            .await;

        let status = c.get_thermostat_status(1001).await.unwrap();
        assert_eq!(status.device_id, 1001);
        assert_eq!(status.name, "Device 1001");
        assert_eq!(status.target_temp, Some(21.5));
        assert_eq!(status.current_temp, Some(19.0));
        assert_eq!(status.heating_percent, 60);
        assert_eq!(status.setpoint_mode, Some(SetpointMode::Schedule));
    }

    #[tokio::test]
    async fn expired_session_is_auth_error() {
        let mut server = Server::new_async().await;
        let c = logged_in(&mut server).await;
        server
            .mock("GET", "/api/device/1001/attribute")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let err = c.get_thermostat_status(1001).await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn server_error_is_api_error() {
        let mut server = Server::new_async().await;
        let c = logged_in(&mut server).await;
        server
            .mock("GET", "/api/devices")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let err = c.get_devices(1).await.unwrap_err();
        assert!(matches!(err, SchluterError::Api(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_connection_error() {
        let c = SchluterClient::new(
            "http://127.0.0.1:1/api",
            "http://127.0.0.1:1/auth",
            Duration::from_secs(2),
        )
        .unwrap();
        let err = c.login("rt").await.unwrap_err();
        assert!(matches!(err, SchluterError::Connection(_)));
    }

    #[tokio::test]
    async fn set_temperature_reports_echo_match() {
        let mut server = Server::new_async().await;
        let c = logged_in(&mut server).await;
        server
            .mock("PUT", "/api/device/1001/attribute")
            .match_body(Matcher::Json(json!({ "roomSetpoint": 22.5 })))
            .with_status(200)
            .with_body(r#"{"roomSetpoint":22.5}"#)
            .create_async()
            .await;
        server
            .mock("PUT", "/api/device/1002/attribute")
            .with_status(200)
            .with_body(r#"{"roomSetpoint":20.0}"#)
            .create_async()
            .await;

        assert!(c.set_temperature(1001, 22.5).await.unwrap());
        assert!(!c.set_temperature(1002, 22.5).await.unwrap());
    }

    #[tokio::test]
    async fn set_modes_send_wire_strings() {
        let mut server = Server::new_async().await;
        let c = logged_in(&mut server).await;
        let mode = server
            .mock("PUT", "/api/device/1001/attribute")
            .match_body(Matcher::Json(json!({ "setpointMode": "manual" })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let occupancy = server
            .mock("PUT", "/api/device/1001/attribute")
            .match_body(Matcher::Json(json!({ "occupancyMode": "away" })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        c.set_mode(1001, SetpointMode::Manual).await.unwrap();
        c.set_occupancy_mode(1001, OccupancyMode::Away).await.unwrap();
        mode.assert_async().await;
        occupancy.assert_async().await;
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let mut server = Server::new_async().await;
        let c = logged_in(&mut server).await;
        assert!(c.is_connected().await);
        c.logout().await;
        assert!(!c.is_connected().await);
        assert!(c.get_devices(1).await.unwrap_err().is_auth());
    }
}
