//! The serve loop: frame reading, method dispatch, exit codes.

use std::path::PathBuf;

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::methods::{self, ServeState};
use crate::protocol::{read_frame, write_frame, JsonRequest, JsonResponse};

/// Normal exit (end of stream or `Exit` method).
pub const EXIT_OK: i32 = 0;
/// The client stream failed mid-frame.
pub const EXIT_READ_FAILURE: i32 = 21;
/// A frame was not valid JSON.
pub const EXIT_BAD_JSON: i32 = 22;
/// A response could not be written.
pub const EXIT_WRITE_FAILURE: i32 = 23;
/// A binary-streaming method failed; its error went to the error stream.
pub const EXIT_STREAM_ERROR: i32 = 33;

/// Methods that stream raw bytes after the request and therefore cannot
/// answer errors in JSON.
const BYTESTREAM_METHODS: &[&str] = &["DownloadFileStart", "DownloadDeltaStart"];

/// Server-side configuration for one serve session.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Root directory holding the served content, laid out like a store
    /// root.
    pub content_root: PathBuf,
    /// Capabilities offered to clients.
    pub caps: Vec<String>,
}

impl ServeConfig {
    /// A config serving `content_root` with the default capability set.
    pub fn new(content_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
            caps: vec!["binary".to_string()],
        }
    }
}

/// Run the request loop until the client disconnects or asks to exit.
///
/// Returns the process exit code: 0 on a normal finish, 21 on a client
/// read failure, 22 on malformed JSON, 23 on a response write failure, and
/// 33 when a binary-streaming method failed (its message having gone to
/// `errout`).
pub async fn serve<R, W, E>(mut input: R, mut output: W, mut errout: E, config: &ServeConfig) -> i32
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut state = ServeState::default();

    loop {
        let frame = match read_frame(&mut input).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return EXIT_OK,
            Err(e) => {
                let _ = errout
                    .write_all(format!("unable to read from client: {e}\n").as_bytes())
                    .await;
                return EXIT_READ_FAILURE;
            }
        };

        let request: JsonRequest = match serde_json::from_slice(&frame) {
            Ok(req) => req,
            Err(e) => {
                let _ = errout
                    .write_all(format!("unable to parse request JSON: {e}\n").as_bytes())
                    .await;
                return EXIT_BAD_JSON;
            }
        };
        debug!(id = request.id, method = %request.method, "dispatching request");

        if request.method == "Exit" {
            let resp = JsonResponse::ok(request.id, &serde_json::json!({}));
            let _ = write_frame(&mut output, &resp).await;
            return EXIT_OK;
        }

        let response =
            methods::handle(&request, &mut input, &mut output, config, &mut state).await;

        // A streaming method that succeeded has already written its bytes.
        let Some(response) = response else { continue };

        if !response.is_ok() && BYTESTREAM_METHODS.contains(&request.method.as_str()) {
            let _ = errout
                .write_all(format!("{}\n", response.error).as_bytes())
                .await;
            return EXIT_STREAM_ERROR;
        }
        if let Err(e) = write_frame(&mut output, &response).await {
            let _ = errout.write_all(format!("{e}\n").as_bytes()).await;
            return EXIT_WRITE_FAILURE;
        }
    }
}
