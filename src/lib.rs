pub mod api;
pub mod config;
pub mod error;
pub mod football;
pub mod utils;

pub use api::{Governor, GovernorStats, Invalidation, Priority, RequestOptions, RequestParams};
pub use config::{GovernorConfig, Settings};
pub use error::{GovernorError, GovernorResult};
pub use football::FootballApi;
