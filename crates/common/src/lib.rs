pub mod config;
pub mod errors;
pub mod structured_logging;

pub use structured_logging::{
    init_structured_logging,
    LoggingConfig,
    StructuredLogEntry,
    ExecutionContext,
    PerformanceMetrics,
    OperationTimer,
};

pub use config::{
    AppConfig, ConfigLoader, ConfigSource, ErrorStoreSettings, LoggingSettings, RetrySettings,
    SalesforceSettings,
};

pub use errors::{ConfigError, ConfigResult};
