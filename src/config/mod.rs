pub mod settings;

pub use settings::{normalize_api_key, GovernorConfig, Settings, DEFAULT_API_BASE_URL};

/// Loads `.env` (if present) and reads settings from the environment.
/// Call [`Settings::validate_and_log`] once logging is up.
pub fn load_settings() -> Settings {
    dotenv::dotenv().ok();
    Settings::from_env()
}
