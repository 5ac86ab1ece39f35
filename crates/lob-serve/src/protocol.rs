//! Wire envelopes and NUL-delimited framing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// A request frame: id, method name, and the method's own fields
/// flattened beside them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRequest {
    /// Monotone positive request id; echoed in the response.
    #[serde(rename = "Id")]
    pub id: u64,
    /// Method name to dispatch on.
    #[serde(rename = "Method")]
    pub method: String,
    /// Method-specific fields.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl JsonRequest {
    /// Build a request with typed params (client side and tests).
    pub fn new<T: Serialize>(id: u64, method: &str, params: &T) -> serde_json::Result<Self> {
        Ok(Self {
            id,
            method: method.to_string(),
            params: to_object(params)?,
        })
    }

    /// Deserialize this request's flattened params into a typed struct.
    pub fn params<T: for<'de> Deserialize<'de>>(&self) -> Result<T, String> {
        serde_json::from_value(Value::Object(self.params.clone()))
            .map_err(|e| format!("invalid parameters for {}: {e}", self.method))
    }
}

/// A response frame: the request's id, an error string (empty on success),
/// and the method-specific result fields flattened beside them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    /// Id of the request this answers.
    #[serde(rename = "Id")]
    pub id: u64,
    /// Empty on success.
    #[serde(rename = "Error", default)]
    pub error: String,
    /// Method-specific result fields.
    #[serde(flatten)]
    pub result: Map<String, Value>,
}

impl JsonResponse {
    /// A success response carrying a serializable result object.
    pub fn ok<T: Serialize>(id: u64, result: &T) -> Self {
        Self {
            id,
            error: String::new(),
            result: to_object(result).unwrap_or_default(),
        }
    }

    /// An error response.
    pub fn failure(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            error: message.into(),
            result: Map::new(),
        }
    }

    /// Whether the response reports success.
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }
}

fn to_object<T: Serialize>(value: &T) -> serde_json::Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(serde::ser::Error::custom(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Read one NUL-terminated frame, without the terminator.
///
/// Returns `Ok(None)` on a clean end of stream (EOF at a frame boundary).
/// EOF in the middle of a frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader.read_until(0, &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    match buf.pop() {
        Some(0) => Ok(Some(buf)),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream ended inside a frame",
        )),
    }
}

/// Serialize a response and write it NUL-terminated.
pub async fn write_frame<W>(writer: &mut W, response: &JsonResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(response).map_err(std::io::Error::other)?;
    bytes.push(0);
    writer.write_all(&bytes).await?;
    writer.flush().await
}
