//! Dispatcher loop tests over in-memory streams.

use lob_serve::{
    serve, JsonRequest, JsonResponse, ServeConfig, EXIT_BAD_JSON, EXIT_OK, EXIT_STREAM_ERROR,
};
use tempfile::TempDir;
use tokio::io::BufReader;

/// Encode a request as a NUL-terminated frame.
fn frame<T: serde::Serialize>(id: u64, method: &str, params: &T) -> Vec<u8> {
    let req = JsonRequest::new(id, method, params).unwrap();
    let mut bytes = serde_json::to_vec(&req).unwrap();
    bytes.push(0);
    bytes
}

/// Split an output stream into its NUL-terminated frames plus trailing raw
/// bytes (from streaming methods).
fn parse_frames(mut output: &[u8], count: usize) -> (Vec<JsonResponse>, Vec<u8>) {
    let mut frames = Vec::new();
    for _ in 0..count {
        let nul = output
            .iter()
            .position(|b| *b == 0)
            .expect("expected a NUL-terminated frame");
        frames.push(serde_json::from_slice(&output[..nul]).unwrap());
        output = &output[nul + 1..];
    }
    (frames, output.to_vec())
}

async fn run(input: Vec<u8>, config: &ServeConfig) -> (i32, Vec<u8>, Vec<u8>) {
    let mut output = Vec::new();
    let mut errout = Vec::new();
    let code = serve(
        BufReader::new(std::io::Cursor::new(input)),
        std::io::Cursor::new(&mut output),
        std::io::Cursor::new(&mut errout),
        config,
    )
    .await;
    (code, output, errout)
}

#[tokio::test]
async fn test_query_caps_and_exit() {
    let root = TempDir::new().unwrap();
    let config = ServeConfig::new(root.path());

    let mut input = frame(1, "QueryCaps", &serde_json::json!({}));
    input.extend(frame(2, "Exit", &serde_json::json!({})));

    let (code, output, _err) = run(input, &config).await;
    assert_eq!(code, EXIT_OK);

    let (frames, rest) = parse_frames(&output, 2);
    assert!(rest.is_empty());
    assert_eq!(frames[0].id, 1);
    assert!(frames[0].is_ok());
    assert_eq!(frames[0].result["Caps"], serde_json::json!(["binary"]));
    assert_eq!(frames[1].id, 2);
    assert!(frames[1].is_ok());
}

#[tokio::test]
async fn test_unknown_method_answers_with_error() {
    let root = TempDir::new().unwrap();
    let config = ServeConfig::new(root.path());

    let input = frame(5, "NoSuchMethod", &serde_json::json!({}));
    let (code, output, _err) = run(input, &config).await;
    // The loop keeps serving after an unknown method; EOF ends it cleanly.
    assert_eq!(code, EXIT_OK);

    let (frames, _) = parse_frames(&output, 1);
    assert_eq!(frames[0].id, 5);
    assert!(frames[0].error.contains("Unknown method NoSuchMethod"));
}

#[tokio::test]
async fn test_malformed_json_exits_22() {
    let root = TempDir::new().unwrap();
    let config = ServeConfig::new(root.path());

    let mut input = b"this is not json".to_vec();
    input.push(0);
    let (code, _output, errout) = run(input, &config).await;
    assert_eq!(code, EXIT_BAD_JSON);
    assert!(!errout.is_empty());
}

#[tokio::test]
async fn test_upload_then_query_and_download() {
    let root = TempDir::new().unwrap();
    let config = ServeConfig::new(root.path());
    let payload = b"binary chunk payload".to_vec();

    let mut input = frame(
        1,
        "UploadFile",
        &serde_json::json!({"Path": "abc/def/chunk_0", "Size": payload.len()}),
    );
    input.extend(&payload);
    input.extend(frame(
        2,
        "FileExists",
        &serde_json::json!({"Path": "abc/def/chunk_0"}),
    ));
    input.extend(frame(
        3,
        "FileExistsOfSize",
        &serde_json::json!({"Path": "abc/def/chunk_0", "Size": payload.len()}),
    ));
    input.extend(frame(
        4,
        "FileExistsOfSize",
        &serde_json::json!({"Path": "abc/def/chunk_0", "Size": 1}),
    ));
    input.extend(frame(
        5,
        "DownloadFilePrepare",
        &serde_json::json!({"Path": "abc/def/chunk_0"}),
    ));
    input.extend(frame(
        6,
        "DownloadFileStart",
        &serde_json::json!({"Path": "abc/def/chunk_0"}),
    ));

    let (code, output, _err) = run(input, &config).await;
    assert_eq!(code, EXIT_OK);

    let (frames, streamed) = parse_frames(&output, 5);
    assert_eq!(frames[0].result["ReceivedOK"], true);
    assert_eq!(frames[1].result["Exists"], true);
    assert_eq!(frames[1].result["Size"], payload.len());
    assert_eq!(frames[2].result["Exists"], true);
    assert_eq!(frames[3].result["Exists"], false);
    assert_eq!(frames[4].result["Size"], payload.len());
    // The streaming method appends raw bytes with no JSON response.
    assert_eq!(streamed, payload);

    assert_eq!(
        std::fs::read(root.path().join("abc/def/chunk_0")).unwrap(),
        payload
    );
}

#[tokio::test]
async fn test_download_start_failure_exits_33() {
    let root = TempDir::new().unwrap();
    let config = ServeConfig::new(root.path());

    let input = frame(
        1,
        "DownloadFileStart",
        &serde_json::json!({"Path": "missing/file"}),
    );
    let (code, output, errout) = run(input, &config).await;
    assert_eq!(code, EXIT_STREAM_ERROR);
    assert!(output.is_empty(), "no JSON response on a stream method error");
    assert!(!errout.is_empty());
}

#[tokio::test]
async fn test_delta_methods_are_refused() {
    let root = TempDir::new().unwrap();
    let config = ServeConfig::new(root.path());

    // The JSON-answering delta method reports the error in-band.
    let input = frame(1, "DownloadDeltaPrepare", &serde_json::json!({}));
    let (code, output, _err) = run(input, &config).await;
    assert_eq!(code, EXIT_OK);
    let (frames, _) = parse_frames(&output, 1);
    assert!(frames[0].error.contains("not supported"));

    // The byte-stream delta method diverts to the error stream.
    let input = frame(1, "DownloadDeltaStart", &serde_json::json!({}));
    let (code, output, errout) = run(input, &config).await;
    assert_eq!(code, EXIT_STREAM_ERROR);
    assert!(output.is_empty());
    assert!(String::from_utf8_lossy(&errout).contains("not supported"));
}

#[tokio::test]
async fn test_path_traversal_is_rejected() {
    let root = TempDir::new().unwrap();
    let config = ServeConfig::new(root.path());

    let input = frame(
        1,
        "FileExists",
        &serde_json::json!({"Path": "../outside"}),
    );
    let (code, output, _err) = run(input, &config).await;
    assert_eq!(code, EXIT_OK);
    let (frames, _) = parse_frames(&output, 1);
    assert!(frames[0].error.contains("invalid path"));
}

#[tokio::test]
async fn test_lob_exists_checks_whole_object() {
    let content = TempDir::new().unwrap();

    // Lay the object out under the served root the way a store root is.
    let store = lob_store::LobStore::new(content.path(), None, 100).unwrap();
    let data = vec![3u8; 250];
    let info = store.store(std::io::Cursor::new(&data), b"").await.unwrap();

    let config = ServeConfig::new(content.path());
    let input = frame(
        1,
        "LOBExists",
        &serde_json::json!({"LobSHA": info.sha.to_string()}),
    );
    let (code, output, _err) = run(input, &config).await;
    assert_eq!(code, EXIT_OK);
    let (frames, _) = parse_frames(&output, 1);
    assert_eq!(frames[0].result["Exists"], true);
    assert_eq!(frames[0].result["Size"], info.size);

    // Remove a chunk: the object is no longer complete.
    std::fs::remove_file(content.path().join(lob_store::rel_chunk_path(&info.sha, 1))).unwrap();
    let input = frame(
        2,
        "LOBExists",
        &serde_json::json!({"LobSHA": info.sha.to_string()}),
    );
    let (code, output, _err) = run(input, &ServeConfig::new(content.path())).await;
    assert_eq!(code, EXIT_OK);
    let (frames, _) = parse_frames(&output, 1);
    assert_eq!(frames[0].result["Exists"], false);
}
