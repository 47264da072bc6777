mod test_support;

use serde_json::json;
use test_support::{create_student, jpeg_bytes, png_bytes, Sidecar};

fn setup(s: &mut Sidecar) -> String {
    let student = create_student(s, "0303250001", "pc-bcom", "B.Com. Honours");
    let res = s.ok("correction.ensure", json!({ "studentId": student }));
    res["request"]["id"].as_str().unwrap().to_string()
}

#[test]
fn upload_stores_file_and_reupload_replaces_it() {
    let ws = tempfile::tempdir().expect("workspace");
    let src = tempfile::tempdir().expect("sources");
    let mut s = Sidecar::with_workspace(ws.path());
    let req = setup(&mut s);

    let photo = src.path().join("me.png");
    std::fs::write(&photo, png_bytes(2048)).unwrap();
    let up = s.ok(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "PHOTO", "sourcePath": photo }),
    );
    let doc_id = up["document"]["documentId"].as_str().unwrap().to_string();
    assert_eq!(up["document"]["sizeBytes"], json!(2048));

    let path = s.ok("correction.documentPath", json!({ "documentId": doc_id }));
    assert_eq!(path["exists"], json!(true));
    let first_path = path["path"].as_str().unwrap().to_string();
    assert!(first_path.ends_with("photo.png"));

    let photo2 = src.path().join("me-again.jpg");
    std::fs::write(&photo2, jpeg_bytes(4096)).unwrap();
    let up2 = s.ok(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "PHOTO", "sourcePath": photo2 }),
    );
    assert_eq!(up2["document"]["documentId"], json!(doc_id));
    assert!(!std::path::Path::new(&first_path).exists());

    let docs = s.ok("correction.documents", json!({ "requestId": req }));
    let docs = docs["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["fileName"], json!("me-again.jpg"));
    assert_eq!(docs[0]["sizeBytes"], json!(4096));
}

#[test]
fn differently_spelled_types_share_one_document() {
    let ws = tempfile::tempdir().expect("workspace");
    let src = tempfile::tempdir().expect("sources");
    let mut s = Sidecar::with_workspace(ws.path());
    let req = setup(&mut s);

    let small = src.path().join("small.png");
    std::fs::write(&small, png_bytes(1000)).unwrap();
    let large = src.path().join("large.png");
    std::fs::write(&large, png_bytes(2000)).unwrap();

    let first = s.ok(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "Marksheet", "sourcePath": small }),
    );
    assert_eq!(first["document"]["documentType"], json!("MARKSHEET"));
    let second = s.ok(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "MARKSHEET", "sourcePath": large }),
    );
    let doc_id = second["document"]["documentId"].as_str().unwrap().to_string();
    assert_eq!(first["document"]["documentId"], json!(doc_id));

    let path = s.ok("correction.documentPath", json!({ "documentId": doc_id }));
    assert_eq!(path["sizeBytes"], json!(2000));
    let on_disk = std::fs::metadata(path["path"].as_str().unwrap()).unwrap().len();
    assert_eq!(on_disk, 2000);

    s.ok(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "Photo ID", "sourcePath": small }),
    );
    let again = s.ok(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "photo_id", "sourcePath": large }),
    );
    assert_eq!(again["document"]["documentType"], json!("PHOTO_ID"));

    let docs = s.ok("correction.documents", json!({ "requestId": req }));
    let docs = docs["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 2);
    for doc in docs {
        let path = s.ok("correction.documentPath", json!({ "documentId": doc["id"] }));
        let on_disk = std::fs::metadata(path["path"].as_str().unwrap()).unwrap().len();
        assert_eq!(json!(on_disk), doc["sizeBytes"]);
    }

    assert_eq!(
        s.fail_code(
            "correction.uploadDocument",
            json!({ "requestId": req, "documentType": " - ", "sourcePath": small }),
        ),
        "bad_params"
    );
}

#[test]
fn oversize_or_mislabelled_files_are_rejected() {
    let ws = tempfile::tempdir().expect("workspace");
    let src = tempfile::tempdir().expect("sources");
    let mut s = Sidecar::with_workspace(ws.path());
    let req = setup(&mut s);

    let big = src.path().join("sign.png");
    std::fs::write(&big, png_bytes(150 * 1024)).unwrap();
    let err = s.fail(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "SIGNATURE", "sourcePath": big }),
    );
    assert_eq!(err["code"], json!("upload_rejected"));
    assert_eq!(err["details"]["documentType"], json!("SIGNATURE"));

    // Non-photo documents get the larger cap.
    s.ok(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "MARKSHEET", "sourcePath": big }),
    );

    let fake = src.path().join("aadhaar.jpg");
    std::fs::write(&fake, png_bytes(512)).unwrap();
    let code = s.fail_code(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "AADHAAR", "sourcePath": fake }),
    );
    assert_eq!(code, "upload_rejected");

    s.ok(
        "setup.update",
        json!({ "section": "uploads", "patch": { "photoMaxKb": 200 } }),
    );
    s.ok(
        "correction.uploadDocument",
        json!({ "requestId": req, "documentType": "SIGNATURE", "sourcePath": big }),
    );
}

#[test]
fn partial_upload_confirms_only_when_configured() {
    let ws = tempfile::tempdir().expect("workspace");
    let src = tempfile::tempdir().expect("sources");
    let mut s = Sidecar::with_workspace(ws.path());
    let req = setup(&mut s);

    let good = src.path().join("photo.png");
    std::fs::write(&good, png_bytes(1024)).unwrap();
    let missing = src.path().join("nowhere.png");
    let uploads = json!([
        { "documentType": "PHOTO", "sourcePath": good },
        { "documentType": "MARKSHEET", "sourcePath": missing },
    ]);

    let res = s.ok(
        "correction.declareDocuments",
        json!({ "requestId": req, "uploads": uploads }),
    );
    assert_eq!(res["tally"], json!("partial"));
    assert_eq!(res["succeeded"], json!(1));
    assert_eq!(res["failed"], json!(1));
    assert_eq!(res["documentsConfirmed"], json!(false));
    assert_eq!(res["results"][1]["error"]["code"], json!("io_failed"));

    s.ok(
        "setup.update",
        json!({ "section": "registration", "patch": { "confirmDocumentsOnPartialUpload": true } }),
    );
    let res = s.ok(
        "correction.declareDocuments",
        json!({ "requestId": req, "uploads": uploads }),
    );
    assert_eq!(res["documentsConfirmed"], json!(true));
    assert_eq!(res["request"]["declarations"]["documents"], json!(true));
}

#[test]
fn all_failed_uploads_never_confirm() {
    let ws = tempfile::tempdir().expect("workspace");
    let mut s = Sidecar::with_workspace(ws.path());
    let req = setup(&mut s);
    s.ok(
        "setup.update",
        json!({ "section": "registration", "patch": { "confirmDocumentsOnPartialUpload": true } }),
    );
    let res = s.ok(
        "correction.declareDocuments",
        json!({
            "requestId": req,
            "uploads": [{ "documentType": "PHOTO", "sourcePath": ws.path().join("gone.png") }],
        }),
    );
    assert_eq!(res["tally"], json!("allFailed"));
    assert_eq!(res["documentsConfirmed"], json!(false));
}
