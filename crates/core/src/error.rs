/// Result alias that carries the custom [`ParticleSimError`] type.
pub type Result<T> = std::result::Result<T, ParticleSimError>;

/// Common error type for the core crate.
///
/// Stepping the simulation never fails; only loading configuration, updates
/// that reference unknown ids and checkpoint restores surface errors.
#[derive(Debug, thiserror::Error)]
pub enum ParticleSimError {
    /// Free-form message for call sites that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration or checkpoint JSON could not be parsed or written.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// A configuration document failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A checkpoint record is malformed; `index` is the offending record.
    #[error("invalid checkpoint record {index}: {reason}")]
    InvalidCheckpoint { index: usize, reason: String },
    /// An update referenced an emitter id that is not registered.
    #[error("unknown emitter `{0}`")]
    UnknownEmitter(String),
    /// An update referenced a force field or sub-emitter id that is not registered.
    #[error("unknown field `{0}`")]
    UnknownField(String),
}

impl ParticleSimError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn invalid_config<T: Into<String>>(reason: T) -> Self {
        Self::InvalidConfig(reason.into())
    }

    pub(crate) fn invalid_checkpoint<T: Into<String>>(index: usize, reason: T) -> Self {
        Self::InvalidCheckpoint {
            index,
            reason: reason.into(),
        }
    }
}

impl From<&str> for ParticleSimError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ParticleSimError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
