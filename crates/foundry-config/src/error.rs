//! Configuration error types.

/// Errors raised while loading, saving, or validating `config.ron`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("cannot read config file: {0}")]
    Read(#[source] std::io::Error),

    /// The config directory or file could not be written.
    #[error("cannot write config file: {0}")]
    Write(#[source] std::io::Error),

    /// The file is not valid RON for [`crate::Config`].
    #[error("malformed config: {0}")]
    Parse(#[source] ron::error::SpannedError),

    /// The config could not be rendered as RON.
    #[error("cannot serialize config: {0}")]
    Serialize(#[source] ron::Error),

    /// A value parsed fine but is outside its legal range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field, e.g. `network.tick_rate_hz`.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}
