//! Method handlers.
//!
//! Each handler parses its flattened params, works under the configured
//! content root, and returns `Some(response)`; streaming methods that
//! already wrote their payload to the output return `None`.

use std::path::{Component, PathBuf};

use lob_types::LobInfo;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::dispatch::ServeConfig;
use crate::protocol::{JsonRequest, JsonResponse};

/// Per-session mutable state.
#[derive(Debug, Default)]
pub(crate) struct ServeState {
    enabled_caps: Vec<String>,
}

#[derive(Deserialize)]
struct PathParams {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Deserialize)]
struct PathSizeParams {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Size")]
    size: u64,
}

#[derive(Deserialize)]
struct LobShaParams {
    #[serde(rename = "LobSHA")]
    lob_sha: lob_types::LobSha,
}

#[derive(Deserialize)]
struct SetCapsParams {
    #[serde(rename = "EnableCaps")]
    enable_caps: Vec<String>,
}

#[derive(Serialize)]
struct ExistsResult {
    #[serde(rename = "Exists")]
    exists: bool,
    #[serde(rename = "Size")]
    size: u64,
}

/// Dispatch one request. `None` means the handler streamed raw bytes and
/// no JSON response follows.
pub(crate) async fn handle<R, W>(
    request: &JsonRequest,
    input: &mut R,
    output: &mut W,
    config: &ServeConfig,
    state: &mut ServeState,
) -> Option<JsonResponse>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let id = request.id;
    match request.method.as_str() {
        "QueryCaps" => Some(JsonResponse::ok(
            id,
            &serde_json::json!({"Caps": config.caps}),
        )),
        "SetEnabledCaps" => Some(set_enabled_caps(request, config, state)),
        "FileExists" => Some(file_exists(request, config).await),
        "FileExistsOfSize" => Some(file_exists_of_size(request, config).await),
        "LOBExists" => Some(lob_exists(request, config).await),
        "UploadFile" => Some(upload_file(request, input, config).await),
        "DownloadFilePrepare" => Some(download_file_prepare(request, config).await),
        "DownloadFileStart" => download_file_start(request, output, config).await,
        // Delta transfer is not offered; the prepare/upload forms answer in
        // JSON, the start form is a byte-stream method and its error is
        // diverted to the error stream by the dispatcher.
        "UploadDelta" | "DownloadDeltaPrepare" | "DownloadDeltaStart" => Some(
            JsonResponse::failure(id, "binary deltas are not supported by this server"),
        ),
        other => Some(JsonResponse::failure(id, format!("Unknown method {other}"))),
    }
}

/// Resolve a client-supplied relative path under the content root,
/// rejecting absolute paths and parent traversal.
fn resolve_path(config: &ServeConfig, rel: &str) -> Result<PathBuf, String> {
    let rel_path = PathBuf::from(rel);
    let clean = rel_path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if rel.is_empty() || !clean {
        return Err(format!("invalid path '{rel}'"));
    }
    Ok(config.content_root.join(rel_path))
}

fn set_enabled_caps(
    request: &JsonRequest,
    config: &ServeConfig,
    state: &mut ServeState,
) -> JsonResponse {
    let params: SetCapsParams = match request.params() {
        Ok(p) => p,
        Err(e) => return JsonResponse::failure(request.id, e),
    };
    for cap in &params.enable_caps {
        if !config.caps.contains(cap) {
            return JsonResponse::failure(request.id, format!("unsupported capability '{cap}'"));
        }
    }
    state.enabled_caps = params.enable_caps;
    JsonResponse::ok(
        request.id,
        &serde_json::json!({"EnabledCaps": state.enabled_caps}),
    )
}

async fn file_exists(request: &JsonRequest, config: &ServeConfig) -> JsonResponse {
    let params: PathParams = match request.params() {
        Ok(p) => p,
        Err(e) => return JsonResponse::failure(request.id, e),
    };
    let path = match resolve_path(config, &params.path) {
        Ok(p) => p,
        Err(e) => return JsonResponse::failure(request.id, e),
    };
    let (exists, size) = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => (true, meta.len()),
        _ => (false, 0),
    };
    JsonResponse::ok(request.id, &ExistsResult { exists, size })
}

async fn file_exists_of_size(request: &JsonRequest, config: &ServeConfig) -> JsonResponse {
    let params: PathSizeParams = match request.params() {
        Ok(p) => p,
        Err(e) => return JsonResponse::failure(request.id, e),
    };
    let path = match resolve_path(config, &params.path) {
        Ok(p) => p,
        Err(e) => return JsonResponse::failure(request.id, e),
    };
    let exists = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta.is_file() && meta.len() == params.size,
        Err(_) => false,
    };
    JsonResponse::ok(
        request.id,
        &ExistsResult {
            exists,
            size: params.size,
        },
    )
}

/// Whether the complete object (meta plus every chunk at its expected
/// size) is present under the content root.
async fn lob_exists(request: &JsonRequest, config: &ServeConfig) -> JsonResponse {
    let params: LobShaParams = match request.params() {
        Ok(p) => p,
        Err(e) => return JsonResponse::failure(request.id, e),
    };
    let sha = params.lob_sha;

    let meta_path = config.content_root.join(lob_store::rel_meta_path(&sha));
    let info: LobInfo = match tokio::fs::read(&meta_path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(info) => info,
            Err(_) => {
                return JsonResponse::ok(request.id, &ExistsResult { exists: false, size: 0 })
            }
        },
        Err(_) => return JsonResponse::ok(request.id, &ExistsResult { exists: false, size: 0 }),
    };

    for i in 0..info.num_chunks {
        let chunk = config.content_root.join(lob_store::rel_chunk_path(&sha, i));
        match tokio::fs::metadata(&chunk).await {
            Ok(meta) if meta.len() == info.expected_chunk_size(i) => {}
            _ => {
                return JsonResponse::ok(request.id, &ExistsResult { exists: false, size: 0 })
            }
        }
    }
    JsonResponse::ok(
        request.id,
        &ExistsResult {
            exists: true,
            size: info.size,
        },
    )
}

/// Receive exactly `Size` raw bytes following the request frame and place
/// them under the content root via a temporary file.
async fn upload_file<R>(request: &JsonRequest, input: &mut R, config: &ServeConfig) -> JsonResponse
where
    R: AsyncBufRead + Unpin,
{
    let params: PathSizeParams = match request.params() {
        Ok(p) => p,
        Err(e) => return JsonResponse::failure(request.id, e),
    };
    let dest = match resolve_path(config, &params.path) {
        Ok(p) => p,
        Err(e) => return JsonResponse::failure(request.id, e),
    };
    let parent = dest.parent().unwrap_or(&config.content_root).to_path_buf();
    if let Err(e) = tokio::fs::create_dir_all(&parent).await {
        return JsonResponse::failure(request.id, format!("unable to create {}: {e}", parent.display()));
    }

    let tmp = match tempfile::Builder::new()
        .prefix("tempupload")
        .tempfile_in(&parent)
    {
        Ok(tmp) => tmp,
        Err(e) => return JsonResponse::failure(request.id, format!("unable to create temp file: {e}")),
    };
    let std_file = match tmp.as_file().try_clone() {
        Ok(f) => f,
        Err(e) => return JsonResponse::failure(request.id, e.to_string()),
    };
    let mut out = tokio::fs::File::from_std(std_file);

    // The payload is framed by its declared size, streamed through a
    // bounded buffer rather than slurped.
    let mut remaining = params.size;
    let mut buf = vec![0u8; 131_072];
    while remaining > 0 {
        let take = buf.len().min(remaining as usize);
        let n = match input.read(&mut buf[..take]).await {
            Ok(0) => {
                return JsonResponse::failure(
                    request.id,
                    format!("client stream ended with {remaining} bytes outstanding"),
                )
            }
            Ok(n) => n,
            Err(e) => return JsonResponse::failure(request.id, e.to_string()),
        };
        if let Err(e) = out.write_all(&buf[..n]).await {
            return JsonResponse::failure(request.id, e.to_string());
        }
        remaining -= n as u64;
    }
    if let Err(e) = out.flush().await {
        return JsonResponse::failure(request.id, e.to_string());
    }
    drop(out);

    let _ = tokio::fs::remove_file(&dest).await;
    if let Err(e) = tmp.persist(&dest) {
        return JsonResponse::failure(request.id, e.error.to_string());
    }
    debug!(path = %dest.display(), size = params.size, "received upload");
    JsonResponse::ok(request.id, &serde_json::json!({"ReceivedOK": true}))
}

async fn download_file_prepare(request: &JsonRequest, config: &ServeConfig) -> JsonResponse {
    let params: PathParams = match request.params() {
        Ok(p) => p,
        Err(e) => return JsonResponse::failure(request.id, e),
    };
    let path = match resolve_path(config, &params.path) {
        Ok(p) => p,
        Err(e) => return JsonResponse::failure(request.id, e),
    };
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {
            JsonResponse::ok(request.id, &serde_json::json!({"Size": meta.len()}))
        }
        _ => JsonResponse::failure(request.id, format!("{} not found", params.path)),
    }
}

/// Stream the raw file bytes directly after the request. On success there
/// is no JSON response; errors surface through the dispatcher's
/// byte-stream handling.
async fn download_file_start<W>(
    request: &JsonRequest,
    output: &mut W,
    config: &ServeConfig,
) -> Option<JsonResponse>
where
    W: AsyncWrite + Unpin,
{
    let params: PathParams = match request.params() {
        Ok(p) => p,
        Err(e) => return Some(JsonResponse::failure(request.id, e)),
    };
    let path = match resolve_path(config, &params.path) {
        Ok(p) => p,
        Err(e) => return Some(JsonResponse::failure(request.id, e)),
    };
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            return Some(JsonResponse::failure(
                request.id,
                format!("unable to open {}: {e}", params.path),
            ))
        }
    };
    if let Err(e) = tokio::io::copy(&mut file, output).await {
        return Some(JsonResponse::failure(request.id, e.to_string()));
    }
    let _ = output.flush().await;
    None
}
