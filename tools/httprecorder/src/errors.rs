use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("no recorded interactions remain for match key `{0}`")]
    KeyNotFound(String),
    #[error("session load error: {0}")]
    SessionLoad(String),
    #[error("session save error: {0}")]
    SessionSave(String),
}
