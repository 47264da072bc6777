mod test_support;

use serde_json::json;
use test_support::{add_option, create_current_session, create_meta, create_student, create_subject, Sidecar};

const PC: &str = "pc-bsc-physics";

#[test]
fn grouping_blocks_pairs_in_scope_and_is_symmetric() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::with_workspace(dir.path());

    let maths = create_subject(&mut s, "Mathematics");
    let stats = create_subject(&mut s, "Statistics");
    let chem = create_subject(&mut s, "Chemistry");
    for (id, sem) in [
        (&maths, "Semester I"),
        (&stats, "Semester I"),
        (&chem, "Semester I"),
        (&maths, "Semester III"),
        (&stats, "Semester III"),
        (&chem, "Semester III"),
    ] {
        add_option(&mut s, PC, id, "MN", sem, false);
    }
    create_meta(&mut s, "MN", "Minor 1", &["Semester I"]);
    create_meta(&mut s, "MN", "Minor 2", &["Semester III"]);
    create_current_session(&mut s, "2025-26");
    let student = create_student(&mut s, "0202250001", PC, "B.Sc. Honours in Physics");

    let up = s.ok(
        "restrictedGroupings.upsert",
        json!({
            "programCourseId": PC,
            "categoryCode": "MN",
            "subjectId": maths,
            "classNames": ["Semester III"],
            "cannotCombineWithSubjectIds": [stats],
        }),
    );
    assert_eq!(up["created"], json!(true));
    let grouping_id = up["restrictedGroupingId"].as_str().unwrap().to_string();

    // Minor 2 is judged in Semester III, where the rule applies.
    let res = s.ok(
        "subjectSelection.resolve",
        json!({ "studentId": student, "selections": { "minor1": "Mathematics" } }),
    );
    let minor2: Vec<&str> = res["options"]["minor2"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(minor2, vec!["Chemistry"]);

    // Symmetric: choosing Statistics first removes Mathematics.
    let res = s.ok(
        "subjectSelection.resolve",
        json!({ "studentId": student, "selections": { "minor1": "Statistics" } }),
    );
    let minor2 = res["options"]["minor2"].as_array().unwrap();
    assert!(!minor2.contains(&json!("Mathematics")));

    // Minor 1 is judged in Semester I and II, outside the rule's scope.
    let res = s.ok(
        "subjectSelection.resolve",
        json!({ "studentId": student, "selections": { "minor2": "Statistics" } }),
    );
    let minor1 = res["options"]["minor1"].as_array().unwrap();
    assert!(minor1.contains(&json!("Mathematics")));

    let listed = s.ok("restrictedGroupings.list", json!({ "programCourseId": PC }));
    assert_eq!(listed["groupings"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(listed["rules"].as_array().map(|a| a.len()), Some(2));

    // Upserting the same subject replaces rather than duplicates.
    let again = s.ok(
        "restrictedGroupings.upsert",
        json!({
            "programCourseId": PC,
            "categoryCode": "MN",
            "subjectId": maths,
            "classNames": [],
            "cannotCombineWithSubjectIds": [chem],
        }),
    );
    assert_eq!(again["created"], json!(false));
    assert_eq!(again["restrictedGroupingId"], json!(grouping_id));

    let res = s.ok(
        "subjectSelection.resolve",
        json!({ "studentId": student, "selections": { "minor2": "Chemistry" } }),
    );
    // No classes means every semester: Minor 1 now loses Mathematics.
    let minor1 = res["options"]["minor1"].as_array().unwrap();
    assert!(!minor1.contains(&json!("Mathematics")));
    assert!(minor1.contains(&json!("Statistics")));

    s.ok(
        "restrictedGroupings.delete",
        json!({ "restrictedGroupingId": grouping_id }),
    );
    let listed = s.ok("restrictedGroupings.list", json!({ "programCourseId": PC }));
    assert_eq!(listed["groupings"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn grouping_against_itself_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::with_workspace(dir.path());
    let maths = create_subject(&mut s, "Mathematics");
    let code = s.fail_code(
        "restrictedGroupings.upsert",
        json!({
            "programCourseId": PC,
            "categoryCode": "MN",
            "subjectId": maths,
            "cannotCombineWithSubjectIds": [maths],
        }),
    );
    assert_eq!(code, "bad_params");
}
