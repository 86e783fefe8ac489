use bytes::Bytes;

use crate::statement::Consistency;
use crate::transport::errors::WriteType;

/// A response to a sent [`RequestFrame`](super::request::RequestFrame).
#[derive(Debug, Clone)]
pub enum ResponseFrame {
    SetKeyspace(String),
    Prepared { id: Bytes },
    RawRows(RawRows),
    Rows(Rows),
    Error(ErrorResponse),
    /// Any other recognized response (e.g. a plain `VOID` acknowledging a
    /// write) that the dispatcher treats as an empty success.
    Void,
}

/// A server error response. The three variants carrying structured fields
/// are the detailed error responses the retry policy is consulted for;
/// `Other` covers every other server error (including what the native
/// protocol calls a plain, undetailed error).
#[derive(Debug, Clone)]
pub enum ErrorResponse {
    Unavailable {
        consistency: Consistency,
        required: i32,
        alive: i32,
        message: String,
    },
    WriteTimeout {
        consistency: Consistency,
        write_type: WriteType,
        blockfor: i32,
        received: i32,
        message: String,
    },
    ReadTimeout {
        consistency: Consistency,
        blockfor: i32,
        received: i32,
        data_present: bool,
        message: String,
    },
    Other {
        code: i32,
        message: String,
    },
}

impl ErrorResponse {
    pub fn message(&self) -> &str {
        match self {
            ErrorResponse::Unavailable { message, .. } => message,
            ErrorResponse::WriteTimeout { message, .. } => message,
            ErrorResponse::ReadTimeout { message, .. } => message,
            ErrorResponse::Other { message, .. } => message,
        }
    }

    /// The native-protocol error code. Kept around mainly so `QueryError`
    /// can report something stable to the caller.
    pub fn code(&self) -> i32 {
        match self {
            ErrorResponse::Unavailable { .. } => 0x1000,
            ErrorResponse::WriteTimeout { .. } => 0x1100,
            ErrorResponse::ReadTimeout { .. } => 0x1200,
            ErrorResponse::Other { code, .. } => *code,
        }
    }
}

/// Result metadata: out of scope to decode in full (column types, table
/// specs). Only what the dispatcher actually needs is kept: how many
/// columns a row carries, and the paging cursor.
#[derive(Debug, Clone, Default)]
pub struct ResultMetadata {
    pub col_count: usize,
    pub paging_state: Option<Bytes>,
}

/// A single decoded row. Column decoding into typed Rust values is the
/// caller's job (out of scope); the core only ever moves rows around.
#[derive(Debug, Clone, Default)]
pub struct Row {
    pub columns: Vec<Option<Bytes>>,
}

#[derive(Debug, Clone, Default)]
pub struct Rows {
    pub rows: Vec<Row>,
    pub metadata: ResultMetadata,
}

/// Rows whose metadata was skipped by the server (`SKIP_METADATA`) because
/// the client already holds it from a prior `PreparedResultResponse`. The
/// dispatcher materializes these with caller-supplied metadata before
/// resolving the user-visible result.
#[derive(Debug, Clone)]
pub struct RawRows {
    pub raw: Bytes,
    pub paging_state: Option<Bytes>,
}

impl RawRows {
    /// Pairs raw row bytes with previously-known metadata. Actually
    /// splitting `raw` into individual `Row`s is a frame-codec concern and
    /// out of scope here.
    pub fn materialize(self, metadata: ResultMetadata) -> Rows {
        Rows {
            rows: Vec::new(),
            metadata: ResultMetadata {
                paging_state: self.paging_state,
                ..metadata
            },
        }
    }
}
