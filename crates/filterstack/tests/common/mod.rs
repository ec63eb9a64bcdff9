//! Shared helpers for black-box integration tests: a small Python driver
//! script that speaks the wire protocol's filter side under an explicit,
//! per-test action list, so each test can script exactly the tag sequence
//! it wants to exercise without hand-writing shell I/O.

#![allow(dead_code)]

use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use filterstack::external::BlobCache;
use filterstack::testutil::InMemoryBlobCache;

const DRIVER_PY: &str = r#"#!/usr/bin/env python3
import json
import sys

def read_line():
    line = bytearray()
    while True:
        c = sys.stdin.buffer.read(1)
        if c == b"" or c == b"\n":
            break
        line += c
    return bytes(line)

def read_item():
    line = read_line()
    if line == b"":
        return None
    n = int(line)
    data = sys.stdin.buffer.read(n)
    sys.stdin.buffer.read(1)
    return data

def read_array():
    out = []
    while True:
        item = read_item()
        if item is None:
            return out
        out.append(item)

def write_item(data):
    if data is None:
        sys.stdout.buffer.write(b"\n")
    else:
        sys.stdout.buffer.write(str(len(data)).encode() + b"\n")
        sys.stdout.buffer.write(data)
        sys.stdout.buffer.write(b"\n")
    sys.stdout.buffer.flush()

def write_tag(tag):
    sys.stdout.buffer.write(tag.encode() + b"\n")
    sys.stdout.buffer.flush()

def write_array(items):
    for it in items:
        write_item(it)
    write_item(None)

# Handshake: version, name, args array, blob.
read_item()
read_item()
handshake_args = read_array()
read_item()

last_get = None
COUNTER_PATH = None

def resolve_value(value):
    # "$ARG0" substitutes the first handshake argument and "$LAST_GET" the
    # most recent get-attribute response, letting a script's written output
    # depend on the descriptor's arguments or its own reads without needing
    # a distinct script file per case.
    if value == "$LAST_GET":
        return last_get.decode() if last_get is not None else ""
    if isinstance(value, str) and value.startswith("$ARG"):
        idx = int(value[len("$ARG"):])
        return handshake_args[idx].decode()
    return value

program = json.loads(PROGRAM)
for action in program:
    op = action["op"]
    if op == "init-success":
        write_tag("init-success")
    elif op == "get-attribute":
        write_tag("get-attribute")
        write_item(action["key"].encode())
        last_get = read_item()
    elif op == "set-attribute":
        write_tag("set-attribute")
        write_item(action["key"].encode())
        write_item(resolve_value(action["value"]).encode())
    elif op == "omit-attribute":
        write_tag("omit-attribute")
        write_item(action["key"].encode())
        read_item()
    elif op == "log":
        write_tag("log")
        write_item(str(action["level"]).encode())
        write_item(action["message"].encode())
    elif op == "result":
        write_tag("result")
        write_item(str(action["score"]).encode())
    elif op == "touch-counter":
        with open(COUNTER_PATH, "ab") as f:
            f.write(b"1")
    elif op == "exit":
        sys.exit(0)
    else:
        raise ValueError(f"unknown op {op}")
"#;

/// Writes a filter script at `dir/name` that runs `program` (a JSON array
/// of `{"op": ..., ...}` actions) after completing the handshake. Returns
/// the script's path.
pub fn write_filter_script(dir: &Path, name: &str, program: &[serde_json::Value]) -> PathBuf {
    write_filter_script_ex(dir, name, program, None)
}

/// Like [`write_filter_script`], but with a `touch-counter` action wired to
/// append one byte to `counter_path` each time it runs, letting a test prove
/// a filter actually re-executed (versus having its result or attribute
/// reused from cache) by counting file length instead of guessing from
/// output content alone.
pub fn write_filter_script_ex(
    dir: &Path,
    name: &str,
    program: &[serde_json::Value],
    counter_path: Option<&Path>,
) -> PathBuf {
    let path = dir.join(name);
    let program_json = serde_json::to_string(program).unwrap();
    let mut script = DRIVER_PY.replace("json.loads(PROGRAM)", &format!("json.loads({program_json:?})"));
    if let Some(counter_path) = counter_path {
        let counter_literal = format!("{:?}", counter_path.to_str().unwrap());
        script = script.replace("COUNTER_PATH = None", &format!("COUNTER_PATH = {counter_literal}"));
    }
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(script.as_bytes()).unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A blob cache preloaded with a filter script (as the executable code
/// blob) and an empty argument blob; returns the blobs plus the two
/// `sha256:` source URIs to put in a descriptor.
pub fn load_filter_blob(blobs: &InMemoryBlobCache, script_bytes: &[u8]) -> (String, String) {
    let code_digest = blobs.add(script_bytes);
    let blob_digest = blobs.add(b"");
    (format!("sha256:{code_digest}"), format!("sha256:{blob_digest}"))
}
