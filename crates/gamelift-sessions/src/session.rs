//! Identity token and client-settings provider.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Client setting holding the game-session service base URL.
pub const SETTING_GAMELIFT_BASE_URL: &str = "gamelift_base_url";

/// Source of the player's identity token and of deployment settings.
///
/// Implementations are shared between the façade and the retry worker, which
/// asks for the token again before every send.
pub trait SessionManager: Send + Sync {
    /// Current identity token. Empty when no player is logged in.
    fn current_identity_token(&self) -> String;

    fn client_setting(&self, name: &str) -> Option<String>;

    /// Whether deployment settings have been loaded at all.
    fn are_settings_loaded(&self) -> bool;
}

/// [`SessionManager`] holding everything in memory.
#[derive(Debug, Default)]
pub struct InMemorySessionManager {
    token: RwLock<String>,
    settings: RwLock<Option<HashMap<String, String>>>,
}

impl InMemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager with settings loaded and the base URL set.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let manager = Self::new();
        manager.load_settings(HashMap::from([(
            SETTING_GAMELIFT_BASE_URL.to_string(),
            base_url.into(),
        )]));
        manager
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }

    pub fn clear_token(&self) {
        self.token.write().clear();
    }

    /// Replace all client settings.
    pub fn load_settings(&self, settings: HashMap<String, String>) {
        *self.settings.write() = Some(settings);
    }

    pub fn unload_settings(&self) {
        *self.settings.write() = None;
    }
}

impl SessionManager for InMemorySessionManager {
    fn current_identity_token(&self) -> String {
        self.token.read().clone()
    }

    fn client_setting(&self, name: &str) -> Option<String> {
        self.settings
            .read()
            .as_ref()
            .and_then(|settings| settings.get(name).cloned())
    }

    fn are_settings_loaded(&self) -> bool {
        self.settings.read().is_some()
    }
}
