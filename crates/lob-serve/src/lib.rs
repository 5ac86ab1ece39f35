//! Request dispatcher for serving LOB content over a byte stream.
//!
//! The wire is symmetric: each message is one UTF-8 JSON object terminated
//! by a single NUL byte (0x00). Requests carry `Id`, `Method`, and
//! method-specific fields; responses echo the `Id` with an `Error` string
//! (empty on success) and a method-specific result. A registered subset of
//! methods streams raw binary payloads after the request instead of
//! answering in JSON.
//!
//! [`serve`] runs the read-dispatch-respond loop until the client closes
//! the stream or sends `Exit`, and reports the process exit code.

mod dispatch;
mod methods;
mod protocol;

pub use dispatch::{
    serve, ServeConfig, EXIT_BAD_JSON, EXIT_OK, EXIT_READ_FAILURE, EXIT_STREAM_ERROR,
    EXIT_WRITE_FAILURE,
};
pub use protocol::{read_frame, write_frame, JsonRequest, JsonResponse};
