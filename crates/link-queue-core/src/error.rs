use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Field {0} must not be empty")]
    EmptyField(&'static str),

    #[error("Invalid request id: {0}")]
    InvalidRequestId(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
