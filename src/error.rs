//! Errores del pipeline: lo que reportan los servicios externos
//! (`CapabilityError`) y el error uniforme que viaja hasta el cliente
//! (`ProcessingError`).

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Categoría de un `ProcessingError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Extraction,
    Parsing,
    ImageSearch,
    Description,
    Network,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Extraction => "extraction",
            Self::Parsing => "parsing",
            Self::ImageSearch => "image_search",
            Self::Description => "description",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error único del pipeline. Se adjunta al estado global (nivel pipeline)
/// o a un `EnrichedDish` concreto (nivel plato, con `dish_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("[{kind}] {message}")]
pub struct ProcessingError {
    pub kind: ErrorKind,
    pub message: String,
    pub dish_id: Option<String>,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingError {
    /// Crea un error recuperable del tipo indicado.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            dish_id: None,
            recoverable: true,
            timestamp: Utc::now(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message).with_recoverable(false)
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Re-etiqueta el error conservando mensaje y recuperabilidad.
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn for_dish(mut self, dish_id: impl Into<String>) -> Self {
        self.dish_id = Some(dish_id.into());
        self
    }
}

/// Fallo reportado por una capacidad externa (visión, búsqueda, descripción).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("error transitorio: {0}")]
    Transient(String),

    #[error("límite de peticiones alcanzado: {0}")]
    RateLimited(String),

    #[error("tiempo de espera agotado tras {0:?}")]
    Timeout(Duration),

    #[error("error permanente: {0}")]
    Permanent(String),

    #[error("servicio no configurado: {0}")]
    Unconfigured(String),
}

impl CapabilityError {
    /// `true` si tiene sentido reintentar la misma llamada.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::RateLimited(_) | Self::Timeout(_)
        )
    }

    /// Clasifica un código HTTP de error.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {status}: {}", truncate(body, 200));
        match status {
            429 => Self::RateLimited(detail),
            408 | 500..=599 => Self::Transient(detail),
            _ => Self::Permanent(detail),
        }
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
