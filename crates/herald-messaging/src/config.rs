use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Catch handler panics and report them instead of unwinding through `send`
    #[serde(default = "default_isolate_panics")]
    pub isolate_panics: bool,

    /// Log a warning when a single handler runs longer than this
    #[serde(default)]
    pub slow_handler_warn_ms: Option<u64>,
}

fn default_isolate_panics() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            isolate_panics: true,
            slow_handler_warn_ms: None,
        }
    }
}
