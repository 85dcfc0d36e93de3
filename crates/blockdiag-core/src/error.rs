// ABOUTME: Error type returned by the diagnostics pipeline and the cache actor.
// ABOUTME: Converts into a StructuredError record for callers that expect the record shape.

use std::path::PathBuf;

use serde_json::json;
use thiserror::Error;

use crate::builder::RecordBuilder;
use crate::model::StructuredError;
use crate::sink::SinkError;

/// Errors that can surface from a diagnose call or a cache operation.
/// A disabled gate is never an error; those calls pass their input through.
#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("unable to write diagnostics for height {height} to {}: {source}", path.display())]
    Persistence {
        height: u64,
        path: PathBuf,
        #[source]
        source: SinkError,
    },

    #[error("unable to serialize diagnostics: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("diagnostics cache channel closed")]
    ChannelClosed,
}

impl DiagnosticsError {
    pub fn kind(&self) -> &'static str {
        match self {
            DiagnosticsError::Persistence { .. } => "persistence",
            DiagnosticsError::Serialize(_) => "serialize",
            DiagnosticsError::MalformedInput(_) => "malformedInput",
            DiagnosticsError::ChannelClosed => "channelClosed",
        }
    }

    /// Render this error as a [`StructuredError`] record built by `builder`.
    pub fn to_structured(&self, builder: &RecordBuilder) -> StructuredError {
        let mut record = builder.new_error(&self.to_string());
        record.metadata.insert("kind".to_string(), json!(self.kind()));
        if let DiagnosticsError::Persistence { height, path, .. } = self {
            record.metadata.insert("height".to_string(), json!(height));
            record
                .metadata
                .insert("path".to_string(), json!(path.display().to_string()));
        }
        record
    }
}
