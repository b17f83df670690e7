//! Network operations: what callers hand to the scheduler.
//!
//! An operation describes one request (endpoint, payload, accepted status
//! codes) and how to turn the response body into a typed result. Its identity
//! names the kind of operation and keys the traffic model, so every instance
//! of the same operation type shares one size estimate.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::error::{Result, SchedulerError};
use crate::transport::TransportRequest;

/// HTTP method of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
}

impl Method {
    /// Uppercase method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL, validated at submission.
    pub url: String,
}

impl Endpoint {
    /// Endpoint with an explicit method.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }

    /// GET endpoint.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// POST endpoint.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }
}

/// How structured parameters are put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterEncoding {
    /// Query string pairs. Values must be scalars.
    #[default]
    Url,
    /// JSON request body.
    Json,
}

/// Payload of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestContent {
    /// Structured parameters; `Value::Null` sends none.
    Parameters {
        /// Parameter object.
        params: serde_json::Value,
        /// Where the parameters go.
        encoding: ParameterEncoding,
    },
    /// Raw body bytes, sent as an upload.
    Data(Bytes),
}

impl Default for RequestContent {
    fn default() -> Self {
        RequestContent::Parameters {
            params: serde_json::Value::Null,
            encoding: ParameterEncoding::Url,
        }
    }
}

/// A request the scheduler can dispatch, with its result decoder.
pub trait NetworkOperation: Send + Sync + 'static {
    /// Decoded result type.
    type Output: Send + 'static;

    /// Operation type label; keys the traffic model.
    fn identity(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Method and URL of the request.
    fn endpoint(&self) -> Endpoint;

    /// Request payload. No parameters by default.
    fn content(&self) -> RequestContent {
        RequestContent::default()
    }

    /// Extra headers, sent after the transport defaults.
    fn headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Status codes treated as success.
    fn accepted_status(&self) -> Vec<RangeInclusive<u16>> {
        vec![200..=299]
    }

    /// Turns a successful response body into the result.
    fn decode(&self, body: Bytes) -> Result<Self::Output>;

    /// Maps a rejected response to the error the caller sees.
    ///
    /// Services that return structured error payloads override this.
    fn decode_error(&self, status: u16, body: Bytes) -> SchedulerError {
        SchedulerError::UnexpectedStatus { status, body }
    }
}

fn invalid(reason: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidRequest {
        reason: reason.into(),
    }
}

fn query_value(key: &str, value: &serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        _ => Err(invalid(format!(
            "parameter {} cannot be URL-encoded: nested value",
            key
        ))),
    }
}

/// Turns an operation into a transport request, validating it on the way.
pub fn prepare<O: NetworkOperation + ?Sized>(operation: &O) -> Result<TransportRequest> {
    let endpoint = operation.endpoint();
    let url = reqwest::Url::parse(&endpoint.url)
        .map_err(|e| invalid(format!("invalid url {:?}: {}", endpoint.url, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }

    let identity = operation.identity();
    if identity.is_empty() {
        return Err(invalid("operation identity is empty"));
    }

    let mut headers = operation.headers();
    let mut query = Vec::new();
    let mut body = None;

    match operation.content() {
        RequestContent::Parameters { params, encoding } => match (params, encoding) {
            (serde_json::Value::Null, _) => {}
            (serde_json::Value::Object(map), ParameterEncoding::Url) => {
                for (key, value) in &map {
                    query.push((key.clone(), query_value(key, value)?));
                }
            }
            (params @ serde_json::Value::Object(_), ParameterEncoding::Json)
            | (params @ serde_json::Value::Array(_), ParameterEncoding::Json) => {
                let encoded = serde_json::to_vec(&params)
                    .map_err(|e| invalid(format!("parameters cannot be encoded: {}", e)))?;
                headers.push(("content-type".to_string(), "application/json".to_string()));
                body = Some(Bytes::from(encoded));
            }
            (other, _) => {
                return Err(invalid(format!(
                    "parameters must be an object, got {}",
                    json_kind(&other)
                )))
            }
        },
        RequestContent::Data(data) => {
            if endpoint.method == Method::Get || endpoint.method == Method::Head {
                return Err(invalid(format!("{} request cannot carry an upload body", endpoint.method)));
            }
            body = Some(data);
        }
    }

    let accepted_status = operation.accepted_status();
    if accepted_status.iter().all(|r| r.is_empty()) {
        return Err(invalid("no accepted status codes"));
    }

    Ok(TransportRequest {
        identity,
        method: endpoint.method,
        url: url.to_string(),
        headers,
        query,
        body,
        accepted_status,
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
