// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the “License”);
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an “AS IS” BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Part of the WEFT project (Work-stealing Execution Fabric for Tiles).

//! End-to-end checks of the `compiler` and `runtime` binaries.

use std::io::Write;
use std::process::{Command, Stdio};

const MULTIPLY_SRC: &str = r#"
int n; std::cin >> n;
std::vector<std::vector<int>> matrix1(n, std::vector<int>(n));
std::vector<std::vector<int>> matrix2(n, std::vector<int>(n));
std::vector<std::vector<int>> result(n, std::vector<int>(n));
for (int i = 0; i < n; i++) {
    for (int j = 0; j < n; j++) {
        for (int k = 0; k < n; k++) {
            result[i][j] += matrix1[i][k] * matrix2[k][j];
        }
    }
}
std::cout << result[0][0] << std::endl;
"#;

#[test]
fn compiler_emits_jsonl_next_to_the_input() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("main.cpp");
    std::fs::write(&src_path, MULTIPLY_SRC).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_compiler"))
        .arg(&src_path)
        .output()
        .expect("run compiler");
    assert!(output.status.success(), "compiler failed: {output:?}");

    let bytecode_path = dir.path().join("main.cpp.jsonl");
    let bytecode = std::fs::read_to_string(&bytecode_path).unwrap();
    assert_eq!(bytecode.lines().count(), 7);
    assert!(bytecode.lines().next().unwrap().contains("READ_INTEGER"));
    assert!(bytecode.contains("MATRIX_MULTIPLY"));
    assert!(bytecode.lines().last().unwrap().contains("TERMINATE"));
}

#[test]
fn compiler_exits_nonzero_on_missing_input() {
    let output = Command::new(env!("CARGO_BIN_EXE_compiler"))
        .arg("/nonexistent/source.cpp")
        .output()
        .expect("run compiler");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn runtime_executes_compiled_bytecode() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("main.cpp");
    std::fs::write(&src_path, MULTIPLY_SRC).unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_compiler"))
        .arg(&src_path)
        .status()
        .expect("run compiler");
    assert!(status.success());

    let mut child = Command::new(env!("CARGO_BIN_EXE_runtime"))
        .arg(dir.path().join("main.cpp.jsonl"))
        .env_remove("GPU_ONLY")
        .env_remove("DISTRIBUTION")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn runtime");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"2\n1 2\n3 4\n5 6\n7 8\n")
        .unwrap();
    let output = child.wait_with_output().expect("runtime output");
    assert!(output.status.success(), "runtime failed: {output:?}");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "19 22\n43 50\n");
    // The execution report goes to stderr, keeping stdout clean.
    assert!(String::from_utf8_lossy(&output.stderr).contains("EXECUTION SUMMARY"));
}

#[test]
fn runtime_accepts_the_compat_flags() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("main.cpp");
    std::fs::write(&src_path, MULTIPLY_SRC).unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_compiler"))
        .arg(&src_path)
        .status()
        .expect("run compiler");
    assert!(status.success());

    let mut child = Command::new(env!("CARGO_BIN_EXE_runtime"))
        .arg(dir.path().join("main.cpp.jsonl"))
        .args(["--use-gpu-for-large", "--use-ane-for-large"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn runtime");
    child.stdin.take().unwrap().write_all(b"1\n3\n4\n").unwrap();
    let output = child.wait_with_output().expect("runtime output");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "12\n");
}

#[test]
fn runtime_exits_nonzero_on_missing_bytecode() {
    let output = Command::new(env!("CARGO_BIN_EXE_runtime"))
        .arg("/nonexistent/prog.jsonl")
        .output()
        .expect("run runtime");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn runtime_exits_nonzero_on_malformed_bytecode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.jsonl");
    std::fs::write(&path, "this is not json\n").unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_runtime"))
        .arg(&path)
        .output()
        .expect("run runtime");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error parsing bytecode"));
}
