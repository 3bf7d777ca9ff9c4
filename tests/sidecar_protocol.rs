//! JSON-lines protocol of the sidecar binary, exercised without FFmpeg.

use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::{Value, json};

fn exchange(requests: &[Value]) -> Vec<Value> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_vid-slicer-sidecar"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sidecar");
    {
        let mut stdin = child.stdin.take().expect("stdin");
        for request in requests {
            writeln!(stdin, "{}", request).expect("write request");
        }
        writeln!(stdin, "not json").expect("write garbage");
    }
    let output = child.wait_with_output().expect("wait sidecar");
    assert!(output.status.success());
    String::from_utf8(output.stdout)
        .expect("utf8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[test]
fn sync_methods_answer_in_order() {
    let responses = exchange(&[
        json!({
            "id": 1,
            "method": "media.inspect",
            "params": {
                "kind": "commandPreview",
                "inputPath": "/videos/talk.mov",
                "options": { "segmentSeconds": 10, "fastMode": true }
            }
        }),
        json!({ "id": 2, "method": "media.cancel", "params": {} }),
        json!({ "id": 3, "method": "media.cancel", "params": { "jobId": 42 } }),
        json!({ "id": 4, "method": "media.explode" }),
    ]);

    assert_eq!(responses.len(), 5);

    assert_eq!(responses[0]["id"], 1);
    let preview = responses[0]["result"].as_str().expect("preview string");
    assert!(preview.starts_with("ffmpeg\n"));
    assert!(preview.contains("-c copy"));
    assert!(preview.contains("/videos/clips/talk_000.mp4"));

    assert_eq!(responses[1]["result"]["cancelled"], false);
    assert!(
        responses[2]["error"]["summary"]
            .as_str()
            .is_some_and(|s| s.contains("Unknown jobId: 42"))
    );
    assert!(
        responses[3]["error"]["summary"]
            .as_str()
            .is_some_and(|s| s.contains("Unknown method"))
    );
    assert_eq!(responses[4]["id"], 0);
    assert_eq!(responses[4]["error"]["summary"], "Invalid request");
}

#[test]
fn invalid_inspect_params_are_reported() {
    let responses = exchange(&[json!({
        "id": 7,
        "method": "media.inspect",
        "params": { "kind": "plan" }
    })]);
    assert_eq!(responses[0]["id"], 7);
    assert!(
        responses[0]["error"]["summary"]
            .as_str()
            .is_some_and(|s| s.starts_with("Invalid params payload"))
    );
}
