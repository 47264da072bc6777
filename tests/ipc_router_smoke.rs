mod test_support;

use serde_json::json;
use test_support::Sidecar;

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::spawn();

    let health = s.ok("health", json!({}));
    assert!(health["version"].is_string());
    assert!(health["workspacePath"].is_null());

    // Everything past core needs a workspace.
    assert_eq!(s.fail_code("subjects.list", json!({})), "no_workspace");
    assert_eq!(s.fail_code("setup.get", json!({})), "no_workspace");

    s.ok(
        "workspace.select",
        json!({ "path": dir.path().to_string_lossy() }),
    );
    assert!(dir.path().join("campus.sqlite3").is_file());

    let families = [
        ("setup.get", json!({})),
        ("students.list", json!({})),
        ("subjects.list", json!({})),
        ("sessions.list", json!({})),
        ("selectionMetas.list", json!({})),
        ("catalogue.list", json!({ "programCourseId": "pc" })),
        ("restrictedGroupings.list", json!({ "programCourseId": "pc" })),
        ("correction.list", json!({})),
        ("correction.nextApplicationNumber", json!({})),
        ("fees.heads.list", json!({})),
        ("fees.structures.list", json!({})),
        ("fees.collections.summary", json!({})),
    ];
    for (method, params) in families {
        s.ok(method, params);
    }

    let err = s.fail("nope.method", json!({}));
    assert_eq!(err["code"], json!("not_implemented"));

    // Unknown params are refused rather than ignored.
    assert_eq!(
        s.fail_code("students.list", json!({ "programCourse": "pc" })),
        "bad_params"
    );
}

#[test]
fn malformed_line_gets_bad_json_and_loop_continues() {
    let mut s = Sidecar::spawn();
    let reply = s.send_raw("{not json");
    assert_eq!(reply["ok"], json!(false));
    assert_eq!(reply["error"]["code"], json!("bad_json"));
    s.ok("health", json!({}));
}
