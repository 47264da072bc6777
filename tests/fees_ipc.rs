mod test_support;

use serde_json::{json, Value};
use test_support::{create_student, Sidecar};

fn id_of(v: &Value, key: &str) -> String {
    v[key]["id"].as_str().unwrap_or_else(|| panic!("no {key}.id in {v}")).to_string()
}

struct Fees {
    tuition: String,
    library: String,
    slab: String,
    receipt: String,
}

fn seed(s: &mut Sidecar) -> Fees {
    let tuition = id_of(
        &s.ok("fees.heads.create", json!({ "name": "Tuition Fee", "defaultPercentage": 100 })),
        "feeHead",
    );
    let library = id_of(
        &s.ok("fees.heads.create", json!({ "name": "Library Fee", "defaultPercentage": 100 })),
        "feeHead",
    );
    let slab = id_of(
        &s.ok(
            "fees.concessionSlabs.create",
            json!({ "name": "S2", "description": "Merit 25%", "defaultRate": 25 }),
        ),
        "concessionSlab",
    );
    let receipt = id_of(
        &s.ok("fees.receiptTypes.create", json!({ "name": "Admission", "chk": "Y" })),
        "receiptType",
    );
    Fees {
        tuition,
        library,
        slab,
        receipt,
    }
}

fn structure(s: &mut Sidecar, f: &Fees) -> String {
    let res = s.ok(
        "fees.structures.create",
        json!({
            "academicYear": "2025-26",
            "className": "Semester I",
            "programCourseId": "pc-bcom",
            "receiptTypeId": f.receipt,
            "components": [
                { "feeHeadId": f.tuition, "amount": 10000, "isConcessionApplicable": true },
                { "feeHeadId": f.library, "amount": 2000.5, "isConcessionApplicable": false },
            ],
        }),
    );
    assert_eq!(res["structure"]["totalAmount"], json!(12000.5));
    id_of(&res, "structure")
}

#[test]
fn mapping_computes_payable_and_tracks_payments() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::with_workspace(dir.path());
    let f = seed(&mut s);
    let structure_id = structure(&mut s, &f);
    let student = create_student(&mut s, "0404250001", "pc-bcom", "B.Com. Honours");

    let m = s.ok(
        "fees.studentMappings.create",
        json!({
            "studentId": student,
            "structureId": structure_id,
            "concessionSlabId": f.slab,
            "type": "FULL",
        }),
    );
    let mapping = &m["mapping"];
    assert_eq!(mapping["baseAmount"], json!(12000.5));
    assert_eq!(mapping["concessionAmount"], json!(2500.0));
    // 12000.5 - 2500 rounds to 9501.
    assert_eq!(mapping["totalPayable"], json!(9501.0));
    assert_eq!(mapping["paymentStatus"], json!("PENDING"));
    let mapping_id = mapping["id"].as_str().unwrap().to_string();

    let upd = s.ok(
        "fees.studentMappings.update",
        json!({ "mappingId": mapping_id, "lateFee": 100, "waivedOffAmount": 601 }),
    );
    assert_eq!(upd["mapping"]["totalPayable"], json!(9000.0));

    let upd = s.ok(
        "fees.studentMappings.update",
        json!({ "mappingId": mapping_id, "concessionSlabId": null }),
    );
    assert_eq!(upd["mapping"]["concessionAmount"], json!(0.0));
    assert_eq!(upd["mapping"]["totalPayable"], json!(11500.0));

    let err = s.fail(
        "fees.studentMappings.recordPayment",
        json!({ "mappingId": mapping_id, "amount": 20000, "mode": "CASH" }),
    );
    assert_eq!(err["code"], json!("bad_params"));

    let paid = s.ok(
        "fees.studentMappings.recordPayment",
        json!({
            "mappingId": mapping_id,
            "amount": 11500,
            "mode": "online",
            "transactionRef": "TXN-1",
        }),
    );
    assert_eq!(paid["mapping"]["paymentStatus"], json!("COMPLETED"));
    assert_eq!(paid["mapping"]["paymentMode"], json!("ONLINE"));
    assert_eq!(paid["mapping"]["outstanding"], json!(0.0));
    assert!(paid["mapping"]["paidAt"].is_string());

    let summary = s.ok("fees.collections.summary", json!({ "academicYear": "2025-26" }));
    assert_eq!(summary["mappings"], json!(1));
    assert_eq!(summary["totalPaid"], json!(11500.0));
    assert_eq!(summary["byStatus"]["COMPLETED"], json!(1));
    assert_eq!(summary["byStatus"]["REFUNDED"], json!(0));
    let other_year = s.ok("fees.collections.summary", json!({ "academicYear": "2024-25" }));
    assert_eq!(other_year["mappings"], json!(0));

    let dash = s.ok("students.dashboard", json!({ "studentId": student }));
    assert_eq!(dash["fees"]["outstanding"], json!(0.0));
}

#[test]
fn slab_rate_change_recomputes_linked_mappings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::with_workspace(dir.path());
    let f = seed(&mut s);
    let structure_id = structure(&mut s, &f);
    let student = create_student(&mut s, "0404250002", "pc-bcom", "B.Com. Honours");
    let m = s.ok(
        "fees.studentMappings.create",
        json!({
            "studentId": student,
            "structureId": structure_id,
            "concessionSlabId": f.slab,
            "type": "INSTALMENT",
            "instalmentNumber": 1,
        }),
    );
    let mapping_id = m["mapping"]["id"].as_str().unwrap().to_string();

    let upd = s.ok(
        "fees.concessionSlabs.update",
        json!({ "concessionSlabId": f.slab, "defaultRate": 50 }),
    );
    assert_eq!(upd["recomputedMappings"], json!(1));
    let listed = s.ok("fees.studentMappings.list", json!({ "studentId": student }));
    let mapping = &listed["mappings"][0];
    assert_eq!(mapping["id"], json!(mapping_id));
    assert_eq!(mapping["concessionAmount"], json!(5000.0));
    assert_eq!(mapping["totalPayable"], json!(7001.0));
}

#[test]
fn referenced_setup_rows_cannot_be_deleted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::with_workspace(dir.path());
    let f = seed(&mut s);
    let structure_id = structure(&mut s, &f);
    let student = create_student(&mut s, "0404250003", "pc-bcom", "B.Com. Honours");
    s.ok(
        "fees.studentMappings.create",
        json!({
            "studentId": student,
            "structureId": structure_id,
            "concessionSlabId": f.slab,
            "type": "FULL",
        }),
    );

    let err = s.fail("fees.heads.delete", json!({ "feeHeadId": f.tuition }));
    assert_eq!(err["code"], json!("in_use"));
    assert_eq!(err["details"]["count"], json!(1));
    assert_eq!(
        s.fail_code("fees.concessionSlabs.delete", json!({ "concessionSlabId": f.slab })),
        "in_use"
    );
    assert_eq!(
        s.fail_code("fees.structures.delete", json!({ "structureId": structure_id })),
        "in_use"
    );

    let spare = id_of(
        &s.ok("fees.heads.create", json!({ "name": "Exam Fee", "defaultPercentage": 50 })),
        "feeHead",
    );
    s.ok("fees.heads.delete", json!({ "feeHeadId": spare }));
    assert_eq!(
        s.fail_code("fees.heads.delete", json!({ "feeHeadId": spare })),
        "not_found"
    );
}

#[test]
fn duplicates_and_bad_values_are_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::with_workspace(dir.path());
    let f = seed(&mut s);
    structure(&mut s, &f);

    assert_eq!(
        s.fail_code("fees.heads.create", json!({ "name": "Tuition Fee", "defaultPercentage": 10 })),
        "conflict"
    );
    assert_eq!(
        s.fail_code("fees.concessionSlabs.create", json!({ "name": "S9", "defaultRate": 120 })),
        "bad_params"
    );
    let code = s.fail_code(
        "fees.structures.create",
        json!({
            "academicYear": "2025-26",
            "className": "Semester I",
            "programCourseId": "pc-bcom",
            "receiptTypeId": f.receipt,
            "components": [],
        }),
    );
    assert_eq!(code, "conflict");

    let heads = s.ok("fees.heads.list", json!({}));
    let names: Vec<&str> = heads["feeHeads"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|h| h["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Tuition Fee", "Library Fee"]);
}

#[test]
fn rejected_update_leaves_the_row_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = Sidecar::with_workspace(dir.path());
    let f = seed(&mut s);

    let err = s.fail(
        "fees.heads.update",
        json!({ "feeHeadId": f.tuition, "name": "Renamed", "defaultPercentage": 150 }),
    );
    assert_eq!(err["code"], json!("bad_params"));
    let heads = s.ok("fees.heads.list", json!({}));
    let tuition = heads["feeHeads"]
        .as_array()
        .unwrap()
        .iter()
        .find(|h| h["id"] == json!(f.tuition))
        .cloned()
        .expect("tuition head");
    assert_eq!(tuition["name"], json!("Tuition Fee"));
    assert_eq!(tuition["defaultPercentage"], json!(100.0));

    let hostel = id_of(
        &s.ok("fees.receiptTypes.create", json!({ "name": "Hostel" })),
        "receiptType",
    );
    let code = s.fail_code(
        "fees.receiptTypes.update",
        json!({ "receiptTypeId": hostel, "name": "Admission", "chk": "Y" }),
    );
    assert_eq!(code, "conflict");
    let updated = s.ok(
        "fees.receiptTypes.update",
        json!({ "receiptTypeId": hostel, "chkOnline": "Y" }),
    );
    assert_eq!(updated["receiptType"]["name"], json!("Hostel"));
    assert_eq!(updated["receiptType"]["chk"], Value::Null);
    assert_eq!(updated["receiptType"]["chkOnline"], json!("Y"));
}
