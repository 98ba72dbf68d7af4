use crate::hub::HubSettings;
use crate::{LobbyServer, ServerConfig};
use crate::error::ServerError;

/// Builder for constructing a [`LobbyServer`] instance.
pub struct ServerBuilder {
    config: ServerConfig,
    jwt_secret: Option<Vec<u8>>,
    hub_settings: HubSettings,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            jwt_secret: None,
            hub_settings: HubSettings::default(),
        }
    }

    /// Set server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the HTTP address.
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.http_addr = addr.into();
        self
    }

    /// Set the session ticket signing secret.
    pub fn jwt_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    /// Set session ticket expiry in seconds. Default: 3600.
    pub fn session_expiry_secs(mut self, secs: u64) -> Self {
        self.config.session_expiry_secs = secs;
        self
    }

    /// Set allowed CORS origins. Empty (the default) is permissive, which
    /// is intended for development only.
    pub fn cors_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.cors_origins = origins.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Override heartbeat and reaping cadence. The defaults are the
    /// production values.
    pub fn hub_settings(mut self, settings: HubSettings) -> Self {
        self.hub_settings = settings;
        self
    }

    /// Build the server.
    pub fn build(self) -> Result<LobbyServer, ServerError> {
        let jwt_secret = self
            .jwt_secret
            .ok_or_else(|| ServerError::Config("jwt_secret is required".into()))?;

        Ok(LobbyServer {
            config: self.config,
            jwt_secret,
            hub_settings: self.hub_settings,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
