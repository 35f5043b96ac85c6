//! Bytes-in / bytes-out request router
//!
//! Each operation name maps to a handler that decodes the request bytes,
//! runs the matching [`Server`] handler and encodes the response bytes.
//! The transport is a thin axum layer: one POST route per operation, raw
//! message bytes in the body both ways. Handler errors become plain-text
//! error responses with a status code derived from the error kind.

use crate::error::Error;
use crate::server::Server;
use crate::wire::{EditReq, GetReq, IncReq, InfoReq, OpenReq, PutReq, ReqBatch};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use prost::Message;
use std::sync::Arc;
use tracing::error;

/// The operations the server routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Operation {
    Info,
    Open,
    Edit,
    Put,
    Inc,
    Get,
    Batch,
}

impl Operation {
    /// Resolve a wire operation name; unknown names are a transport-level
    /// failure, not a handler error.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "info" => Some(Self::Info),
            "open" => Some(Self::Open),
            "edit" => Some(Self::Edit),
            "put" => Some(Self::Put),
            "inc" => Some(Self::Inc),
            "get" => Some(Self::Get),
            "batch" => Some(Self::Batch),
            _ => None,
        }
    }
}

/// Decode, handle and re-encode one request
pub async fn dispatch(server: &Server, op: Operation, data: &[u8]) -> Result<Vec<u8>, Error> {
    match op {
        Operation::Info => {
            let req = InfoReq::decode(data)?;
            Ok(server.info(&req).await?.encode_to_vec())
        }
        Operation::Open => {
            let req = OpenReq::decode(data)?;
            Ok(server.open(&req).await?.encode_to_vec())
        }
        Operation::Edit => {
            let req = EditReq::decode(data)?;
            Ok(server.edit(&req).await?.encode_to_vec())
        }
        Operation::Put => {
            let req = PutReq::decode(data)?;
            Ok(server.put(&req).await?.encode_to_vec())
        }
        Operation::Inc => {
            let req = IncReq::decode(data)?;
            Ok(server.inc(&req).await?.encode_to_vec())
        }
        Operation::Get => {
            let req = GetReq::decode(data)?;
            Ok(server.get(&req).await?.encode_to_vec())
        }
        Operation::Batch => {
            let req = ReqBatch::decode(data)?;
            Ok(server.batch(&req).await?.encode_to_vec())
        }
    }
}

/// Build the transport router: one POST route per operation name
pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/:operation", post(handle))
        .with_state(server)
}

async fn handle(
    State(server): State<Arc<Server>>,
    Path(operation): Path<String>,
    body: Bytes,
) -> Response {
    let Some(op) = Operation::parse(&operation) else {
        return (
            StatusCode::NOT_FOUND,
            format!("unknown operation {operation:?}\n"),
        )
            .into_response();
    };

    match dispatch(&server, op, &body).await {
        Ok(bytes) => Bytes::from(bytes).into_response(),
        Err(e) => {
            error!(operation = %operation, error = %e, "request failed");
            e.into_response()
        }
    }
}

fn status(err: &Error) -> StatusCode {
    match err {
        Error::DatabaseNotFound => StatusCode::NOT_FOUND,
        Error::Resolution | Error::Name(_) | Error::Decode(_) => StatusCode::BAD_REQUEST,
        Error::BatchAborted { source, .. } => status(source),
        Error::Store(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (status(&self), format!("{self}\n")).into_response()
    }
}
