//! Runs the `testforge` binary against a local stand-in for the chat
//! completions endpoint and checks what lands on stdout.

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread::JoinHandle;

const LOGIN_REPLY: &str = r#"{
  "modules": [
    {"module_name": "Login", "test_types": [
      {"type_name": "functional", "scenarios": [
        {"scenario_name": "normal", "test_cases": [
          {"title": "valid credentials", "confidence": 0.92},
          {"title": "remember me", "confidence": 0.55}
        ]},
        {"scenario_name": "exception", "test_cases": [
          {"title": "wrong password", "confidence": 0.2}
        ]}
      ]}
    ]}
  ],
  "defects": [],
  "questions": [{"question": "How many attempts before lockout?", "priority": "high"}]
}"#;

/// Answers exactly one chat completion request with `reply` as the message
fn serve_one_completion(reply: &str) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let body = json!({
        "choices": [{ "message": { "role": "assistant", "content": reply }, "finish_reason": "stop" }]
    })
    .to_string();

    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);

        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut request_body = vec![0u8; content_length];
        reader.read_exact(&mut request_body).unwrap();

        let mut stream = reader.into_inner();
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
        .unwrap();
        stream.flush().unwrap();
    });
    (endpoint, handle)
}

fn write_docx(dir: &Path) -> PathBuf {
    let document = r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Login</w:t></w:r></w:p><w:p><w:r><w:t>Users sign in with email and password.</w:t></w:r></w:p></w:body></w:document>"#;
    let styles = r#"<?xml version="1.0" encoding="UTF-8"?><w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/></w:style></w:styles>"#;

    let path = dir.join("login.docx");
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    let options = zip::write::FileOptions::default();
    zip.start_file("word/document.xml", options).unwrap();
    zip.write_all(document.as_bytes()).unwrap();
    zip.start_file("word/styles.xml", options).unwrap();
    zip.write_all(styles.as_bytes()).unwrap();
    zip.finish().unwrap();
    path
}

fn write_config(dir: &Path, endpoint: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    let yaml = format!(
        "backend: openai\nopenai:\n  endpoint: {endpoint}\n  api_key: sk-local-only\nretry:\n  max_attempts: 1\noutput_dir: {}\n",
        dir.join("out").display()
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

fn testforge(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_testforge"))
        .args(args)
        .env("TESTFORGE_LOG", "off")
        .env_remove("TESTFORGE_BACKEND")
        .env_remove("OPENAI_API_KEY")
        .env_remove("OPENAI_BASE_URL")
        .env_remove("OPENAI_MODEL")
        .output()
        .unwrap()
}

#[test]
fn json_summary_is_the_only_thing_on_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, server) = serve_one_completion(LOGIN_REPLY);
    let doc = write_docx(dir.path());
    let config = write_config(dir.path(), &endpoint);
    let out = dir.path().join("login.xmind");

    let output = testforge(&[
        "generate",
        "-i",
        doc.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "-c",
        config.to_str().unwrap(),
        "--json-summary",
    ]);
    server.join().unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["total_cases"], 3);
    assert_eq!(summary["green_cases"], 1);
    assert_eq!(summary["red_cases"], 1);
    assert_eq!(summary["questions_count"], 1);
    assert!(out.is_file());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Loaded config from"));
}

#[test]
fn show_config_prints_only_redacted_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "http://127.0.0.1:9");

    let output = testforge(&["show-config", "-c", config.to_str().unwrap()]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("backend: openai"), "{stdout}");
    assert!(stdout.contains("http://127.0.0.1:9"));
    assert!(!stdout.contains("sk-local-only"));
    assert!(!stdout.contains("📋"));
}
