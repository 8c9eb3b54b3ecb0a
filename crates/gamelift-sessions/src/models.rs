//! Request and response payloads of the game-session service.

use crate::error::GameLiftResult;

/// Game properties sent when creating a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateGameSession {
    properties: Vec<(String, String)>,
}

impl CreateGameSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a game property. A repeated key replaces the earlier value.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    /// Compact JSON object of string properties.
    pub fn to_json(&self) -> GameLiftResult<String> {
        let object: serde_json::Map<String, serde_json::Value> = self
            .properties
            .iter()
            .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
            .collect();
        Ok(serde_json::to_string(&object)?)
    }
}

/// Response of a successful create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSessionResponse {
    pub status: u16,
    pub body: String,
}

impl GameSessionResponse {
    /// Parse the body as JSON.
    pub fn json(&self) -> GameLiftResult<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}
