//! Core traits shared between the engine and its collaborators

use crate::types::LanguagePreferences;

/// Read-only view of user settings consumed by the engine.
///
/// Values are read on every request so credential changes take effect
/// without rebuilding the engine.
pub trait SettingsProvider: Send + Sync {
    /// Access credential for the cloud backend, if the user configured one.
    fn cloud_api_key(&self) -> Option<String>;

    fn language_preferences(&self) -> LanguagePreferences;
}

/// Fixed settings, mostly useful for tests and one-shot CLI runs.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    pub cloud_api_key: Option<String>,
    pub languages: LanguagePreferences
}

impl StaticSettings {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.cloud_api_key = Some(key.into());
        self
    }
}

impl SettingsProvider for StaticSettings {
    fn cloud_api_key(&self) -> Option<String> {
        self.cloud_api_key.clone().filter(|key| !key.trim().is_empty())
    }

    fn language_preferences(&self) -> LanguagePreferences {
        self.languages.clone()
    }
}
