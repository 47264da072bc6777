#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

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
            .env_remove("CAMPUSD_WORKSPACE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn campusd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawns and selects `workspace` in one go.
    pub fn with_workspace(workspace: &Path) -> Self {
        let mut s = Self::spawn();
        s.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        s
    }

    pub fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Returns the whole `error` object.
    pub fn fail(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error object")
    }

    pub fn fail_code(&mut self, method: &str, params: Value) -> String {
        self.fail(method, params)["code"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_of<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string {key} in {v}"))
}

pub fn create_subject(s: &mut Sidecar, name: &str) -> String {
    let res = s.ok("subjects.create", json!({ "name": name }));
    str_of(&res, "subjectId").to_string()
}

pub fn create_student(s: &mut Sidecar, uid: &str, program_course_id: &str, program_course_name: &str) -> String {
    let res = s.ok(
        "students.create",
        json!({
            "uid": uid,
            "name": format!("Student {uid}"),
            "programCourseId": program_course_id,
            "programCourseName": program_course_name,
        }),
    );
    str_of(&res, "studentId").to_string()
}

pub fn create_current_session(s: &mut Sidecar, name: &str) -> String {
    let res = s.ok("sessions.create", json!({ "name": name, "isCurrent": true }));
    str_of(&res, "sessionId").to_string()
}

pub fn add_option(
    s: &mut Sidecar,
    program_course_id: &str,
    subject_id: &str,
    category: &str,
    class_name: &str,
    auto_assign: bool,
) {
    s.ok(
        "catalogue.addOption",
        json!({
            "programCourseId": program_course_id,
            "subjectId": subject_id,
            "categoryCode": category,
            "className": class_name,
            "autoAssign": auto_assign,
        }),
    );
}

pub fn create_meta(s: &mut Sidecar, category: &str, label: &str, class_names: &[&str]) -> String {
    let res = s.ok(
        "selectionMetas.create",
        json!({ "categoryCode": category, "label": label, "classNames": class_names }),
    );
    str_of(&res, "metaId").to_string()
}

/// Smallest valid PNG header padded to `len` bytes.
pub fn png_bytes(len: usize) -> Vec<u8> {
    let mut v = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    v.resize(len.max(8), 0);
    v
}

pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    let mut v = vec![0xFF, 0xD8, 0xFF, 0xE0];
    v.resize(len.max(4), 0);
    v
}
