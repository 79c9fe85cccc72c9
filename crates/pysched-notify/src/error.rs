use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// SMTP transport could not be constructed from the configuration.
    #[error("Email configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
