#[path = "../src/registration/archive.rs"]
mod archive;
mod test_support;

use archive::{entry_name, export_document_archive, read_manifest, ArchiveEntry, ARCHIVE_FORMAT};
use serde_json::json;
use std::io::Read;
use test_support::{create_student, png_bytes, Sidecar};

#[test]
fn export_writes_entries_and_manifest() {
    let ws = tempfile::tempdir().expect("workspace");
    let rel = "documents/req-1/photo.png";
    std::fs::create_dir_all(ws.path().join("documents/req-1")).unwrap();
    std::fs::write(ws.path().join(rel), png_bytes(300)).unwrap();

    let out = ws.path().join("exports/docs.zip");
    let entries = vec![ArchiveEntry {
        uid: "0101250001".into(),
        document_type: "PHOTO".into(),
        file_name: "me.png".into(),
        sha256: "abc".into(),
        path: rel.into(),
    }];
    let summary = export_document_archive(ws.path(), &entries, &out, "2026-01-01T00:00:00Z").unwrap();
    assert_eq!(summary.entry_count, 1);

    let manifest = read_manifest(&out).unwrap();
    assert_eq!(manifest.format, ARCHIVE_FORMAT);
    assert_eq!(manifest.documents.len(), 1);
    assert_eq!(manifest.documents[0].path, "documents/0101250001/PHOTO-me.png");

    let mut zip = zip::ZipArchive::new(std::fs::File::open(&out).unwrap()).unwrap();
    let mut bytes = Vec::new();
    zip.by_name(&entry_name("0101250001", "PHOTO", "me.png"))
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    assert_eq!(bytes, png_bytes(300));
}

#[test]
fn missing_source_fails_export() {
    let ws = tempfile::tempdir().expect("workspace");
    let entries = vec![ArchiveEntry {
        uid: "u".into(),
        document_type: "PHOTO".into(),
        file_name: "x.png".into(),
        sha256: String::new(),
        path: "documents/none/photo.png".into(),
    }];
    let out = ws.path().join("docs.zip");
    assert!(export_document_archive(ws.path(), &entries, &out, "now").is_err());
}

#[test]
fn entry_names_never_nest_through_separators() {
    assert_eq!(entry_name("a/b", "PHOTO", "..\\x.png"), "documents/a_b/PHOTO-.._x.png");
}

#[test]
fn archive_method_exports_every_uploaded_document() {
    let ws = tempfile::tempdir().expect("workspace");
    let src = tempfile::tempdir().expect("sources");
    let mut s = Sidecar::with_workspace(ws.path());
    let student = create_student(&mut s, "0606250001", "pc", "B.A. Honours in Sanskrit");
    let req = s.ok("correction.ensure", json!({ "studentId": student }))["request"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let photo = src.path().join("face.png");
    std::fs::write(&photo, png_bytes(700)).unwrap();
    s.ok(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "PHOTO", "sourcePath": photo }),
    );

    let out = src.path().join("all-docs.zip");
    let res = s.ok("correction.archive", json!({ "outPath": out }));
    assert_eq!(res["entryCount"], json!(1));
    assert_eq!(
        res["documents"][0]["path"],
        json!("documents/0606250001/PHOTO-face.png")
    );
    assert!(out.is_file());
}
