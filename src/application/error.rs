use std::{error::Error as StdError, io};

use axum::http::StatusCode;
use axum::response::Response;
use thiserror::Error;

use crate::{
    application::engine::EngineError, domain::error::ParseError, infra::error::InfraError,
};

/// Failure details carried on a response so the logging middleware can report them.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("no url or html provided")]
    NoSource,
    #[error("conversion timed out")]
    Timeout,
    #[error("WaitUntil timed out")]
    WaitUntilTimeout,
    #[error("page has no 'body' element")]
    NoBody,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to stage html source: {0}")]
    Scratch(io::Error),
}

impl ConversionError {
    /// Short label used in logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            ConversionError::Parse(err) => err.kind.as_str(),
            ConversionError::NoSource => "no_source",
            ConversionError::Timeout => "timeout",
            ConversionError::WaitUntilTimeout => "wait_until_timeout",
            ConversionError::NoBody => "no_body",
            ConversionError::Engine(_) => "engine",
            ConversionError::Scratch(_) => "scratch",
        }
    }
}

/// Failures that stop the binary itself rather than a single request.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
