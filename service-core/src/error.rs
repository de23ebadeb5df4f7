use thiserror::Error;

/// Infrastructure-level error shared by service binaries.
///
/// Domain crates keep their own error enums and convert into this type only
/// at startup and configuration boundaries.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_become_internal() {
        let err: AppError = std::io::Error::other("address in use").into();
        assert!(matches!(err, AppError::InternalError(_)));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn config_errors_keep_their_message() {
        let err: AppError = config::ConfigError::Message("bad port".to_string()).into();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert!(err.to_string().contains("bad port"));
    }
}
