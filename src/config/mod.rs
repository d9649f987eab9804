mod settings;

pub use settings::{
    CaptureConfig, ConfigError, SettleConfig, TomlConfig, TomlSettleConfig, DEFAULT_CAPTURE_LOG,
    DEFAULT_ENDPOINT, DEFAULT_TESTDATA_ROOT, EXAMPLE_CONFIG,
};
