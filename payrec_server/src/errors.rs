use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use payrec_engine::{ReconError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Payload deserialization error")]
    CouldNotDeserializePayload,
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("Authentication Error. {0}")]
    AuthenticationError(#[from] AuthError),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("The engine is busy, retry shortly. {0}")]
    Busy(String),
    #[error("The payment gateway could not be reached. {0}")]
    GatewayUnavailable(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::CouldNotDeserializePayload => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationError(e) => match e {
                AuthError::MissingCredentials => StatusCode::UNAUTHORIZED,
                AuthError::InvalidApiKey => StatusCode::UNAUTHORIZED,
                AuthError::ForbiddenPeer => StatusCode::FORBIDDEN,
            },
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("No operator credentials were provided.")]
    MissingCredentials,
    #[error("The provided operator API key is not valid.")]
    InvalidApiKey,
    #[error("Requests from this address are not allowed.")]
    ForbiddenPeer,
}

impl From<ReconError> for ServerError {
    fn from(e: ReconError) -> Self {
        match e {
            ReconError::Store(StoreError::TransactionNotFound(code)) => {
                Self::NoRecordFound(format!("Transaction {code}"))
            },
            ReconError::Store(e) => Self::BackendError(e.to_string()),
            e @ ReconError::LockTimeout(_) => Self::Busy(e.to_string()),
            e @ ReconError::OverrideReasonRequired => Self::InvalidRequestBody(e.to_string()),
            ReconError::Gateway(e) => Self::GatewayUnavailable(e.to_string()),
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        ServerError::from(ReconError::from(e))
    }
}
