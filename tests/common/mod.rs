#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_workspace(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_campusd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn campusd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawns the daemon and selects a fresh temp workspace.
    pub fn spawn_with_workspace(prefix: &str) -> (Self, PathBuf) {
        let workspace = temp_workspace(prefix);
        let mut sidecar = Self::spawn();
        sidecar.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        (sidecar, workspace)
    }

    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
        resp.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Asserts the request fails and returns the error code and object.
    pub fn request_err(&mut self, method: &str, params: Value) -> (String, Value) {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            resp
        );
        let error = resp.get("error").cloned().unwrap_or(Value::Null);
        let code = error
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        (code, error)
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string field {} in {}", key, value))
        .to_string()
}

/// Creates a session with its three terms; returns (session id, term ids).
pub fn seed_session(sidecar: &mut Sidecar, name: &str) -> (String, Vec<String>) {
    let result = sidecar.request_ok("sessions.create", json!({ "name": name }));
    let session_id = str_field(&result, "sessionId");
    let terms = result
        .get("terms")
        .and_then(|v| v.as_array())
        .expect("terms")
        .iter()
        .map(|t| str_field(t, "termId"))
        .collect();
    (session_id, terms)
}

pub fn seed_class(sidecar: &mut Sidecar, name: &str) -> String {
    let result = sidecar.request_ok("classes.create", json!({ "name": name }));
    str_field(&result, "classId")
}

pub fn seed_student(sidecar: &mut Sidecar, class_id: &str, admission_no: &str) -> String {
    let result = sidecar.request_ok(
        "students.create",
        json!({
            "classId": class_id,
            "admissionNo": admission_no,
            "lastName": "Okafor",
            "firstName": admission_no.to_string(),
        }),
    );
    str_field(&result, "studentId")
}

pub fn seed_course(sidecar: &mut Sidecar, class_id: &str, code: &str, is_core: bool) -> String {
    let result = sidecar.request_ok(
        "courses.create",
        json!({
            "classId": class_id,
            "code": code,
            "name": format!("{} course", code),
            "isCore": is_core,
        }),
    );
    str_field(&result, "courseId")
}

pub fn register_courses(sidecar: &mut Sidecar, student_id: &str, term_id: &str, course_ids: &[&str]) {
    sidecar.request_ok(
        "registration.set",
        json!({
            "studentId": student_id,
            "termId": term_id,
            "courseIds": course_ids,
        }),
    );
}
