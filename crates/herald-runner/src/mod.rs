mod herald_config;
mod logging;
mod paths;

pub use herald_config::{ConfigLoadError, HeraldConfig, LoggingConfig, EXAMPLE_CONFIG};
pub use logging::init_logging;
pub use paths::ProjectPaths;
