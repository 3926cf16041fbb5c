use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Generator returned error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Generator returned no usable prompts")]
    EmptyResponse,

    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for GenError {
    fn from(err: anyhow::Error) -> Self {
        GenError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GenError>;
