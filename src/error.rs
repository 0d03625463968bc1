use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use elasticsearch::Error as ElasticsearchError;
use serde_json::Error as SerdeJsonError;
use tantivy::{query::QueryParserError, TantivyError};
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Field '{field}' is invalid: {reason}")]
    Validation { field: &'static str, reason: &'static str },

    #[error("A new image cannot already have an id")]
    IdentifierConflict,

    #[error("Invalid id: the request body carries no id")]
    IdentifierMissing,

    #[error("Invalid id: path id {path} does not match body id {body}")]
    IdentifierMismatch { path: i64, body: i64 },

    #[error("Entity not found: no image with id {0}")]
    UpdateTargetNotFound(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Index propagation of outbox entry {seq} failed after {attempts} attempts: {reason}")]
    IndexPropagation { seq: i64, attempts: u32, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Elasticsearch error: {0}")]
    Elasticsearch(#[from] ElasticsearchError),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("Tantivy query parser error: {0}")]
    QueryParser(#[from] QueryParserError),

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),

    #[error("Tokio join error: {0}")]
    Join(#[from] JoinError),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl AppError {
    pub fn missing(field: &'static str) -> Self {
        AppError::Validation {
            field,
            reason: "must not be null",
        }
    }

    pub fn not_found(id: i64) -> Self {
        AppError::NotFound(format!("image {}", id))
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Validation { field, .. } => serde_json::json!({
                "error": self.to_string(),
                "field": field,
            }),
            _ => serde_json::json!({
                "error": self.to_string(),
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::IdentifierConflict => StatusCode::BAD_REQUEST,
            AppError::IdentifierMissing => StatusCode::BAD_REQUEST,
            AppError::IdentifierMismatch { .. } => StatusCode::BAD_REQUEST,
            // PUT/PATCH against an unknown id is a bad request, not a 404
            AppError::UpdateTargetNotFound(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::IndexPropagation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Sqlite(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Elasticsearch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Tantivy(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::QueryParser(_) => StatusCode::BAD_REQUEST,
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Generic(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
