use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::setup;
use crate::db;
use crate::ipc::helpers::{
    exists, parse_params, with_conn, with_workspace, ConnHandler, HandlerErr,
    WorkspaceHandler,
};
use crate::ipc::types::{AppState, Request};
use crate::registration::archive::{self, ArchiveEntry};
use crate::registration::status::CorrectionStatus;
use crate::registration::uploads::{self, UploadTally};
use crate::registration::{appno, RegistrationError};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StudentParams {
    student_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RequestParams {
    request_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ListParams {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpdateStatusParams {
    request_id: String,
    status: String,
    #[serde(default)]
    remarks: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DecisionParams {
    request_id: String,
    #[serde(default)]
    remarks: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PersonalFlags {
    #[serde(default)]
    gender: bool,
    #[serde(default)]
    nationality: bool,
    #[serde(default)]
    aadhaar_number: bool,
    #[serde(default)]
    apaar_id: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SubmitPersonalParams {
    request_id: String,
    #[serde(default)]
    flags: PersonalFlags,
    personal_info: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SubmitAddressParams {
    request_id: String,
    residential: Map<String, Value>,
    mailing: Map<String, Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SubjectFlags {
    #[serde(default)]
    subjects: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SubmitSubjectsParams {
    request_id: String,
    #[serde(default)]
    flags: SubjectFlags,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UploadItem {
    document_type: String,
    source_path: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UploadParams {
    request_id: String,
    document_type: String,
    source_path: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DeclareDocumentsParams {
    request_id: String,
    #[serde(default)]
    uploads: Vec<UploadItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DocumentParams {
    document_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ValidateNumberParams {
    application_number: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ArchiveParams {
    out_path: PathBuf,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoParams {}

struct CorrectionRow {
    id: String,
    student_id: String,
    status: CorrectionStatus,
    remarks: Option<String>,
    application_number: Option<String>,
    personal_declared: bool,
    address_declared: bool,
    subjects_declared: bool,
    documents_declared: bool,
    online_registration_done: bool,
    gender_correction: bool,
    nationality_correction: bool,
    aadhaar_correction: bool,
    apaar_correction: bool,
    subjects_correction: bool,
    personal_info: Option<Value>,
    address_info: Option<Value>,
    created_at: String,
    updated_at: String,
}

impl CorrectionRow {
    fn missing_declarations(&self) -> Vec<&'static str> {
        [
            ("personal", self.personal_declared),
            ("address", self.address_declared),
            ("subjects", self.subjects_declared),
            ("documents", self.documents_declared),
        ]
        .into_iter()
        .filter(|(_, done)| !done)
        .map(|(name, _)| name)
        .collect()
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "status": self.status.as_str(),
            "remarks": self.remarks,
            "applicationNumber": self.application_number,
            "declarations": {
                "personal": self.personal_declared,
                "address": self.address_declared,
                "subjects": self.subjects_declared,
                "documents": self.documents_declared,
            },
            "corrections": {
                "gender": self.gender_correction,
                "nationality": self.nationality_correction,
                "aadhaarNumber": self.aadhaar_correction,
                "apaarId": self.apaar_correction,
                "subjects": self.subjects_correction,
            },
            "personalInfo": self.personal_info,
            "addressInfo": self.address_info,
            "onlineRegistrationDone": self.online_registration_done,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

const REQUEST_COLUMNS: &str = "id, student_id, status, remarks, application_number,
    personal_declared, address_declared, subjects_declared, documents_declared,
    online_registration_done, gender_correction, nationality_correction,
    aadhaar_correction, apaar_correction, subjects_correction,
    personal_json, address_json, created_at, updated_at";

type RawRow = (CorrectionRow, String);

fn raw_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    let flag = |i: usize| -> rusqlite::Result<bool> { Ok(r.get::<_, i64>(i)? != 0) };
    let json_col = |i: usize| -> rusqlite::Result<Option<Value>> {
        Ok(r
            .get::<_, Option<String>>(i)?
            .and_then(|s| serde_json::from_str(&s).ok()))
    };
    Ok((
        CorrectionRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
            status: CorrectionStatus::Pending,
            remarks: r.get(3)?,
            application_number: r.get(4)?,
            personal_declared: flag(5)?,
            address_declared: flag(6)?,
            subjects_declared: flag(7)?,
            documents_declared: flag(8)?,
            online_registration_done: flag(9)?,
            gender_correction: flag(10)?,
            nationality_correction: flag(11)?,
            aadhaar_correction: flag(12)?,
            apaar_correction: flag(13)?,
            subjects_correction: flag(14)?,
            personal_info: json_col(15)?,
            address_info: json_col(16)?,
            created_at: r.get(17)?,
            updated_at: r.get(18)?,
        },
        r.get(2)?,
    ))
}

fn with_status((mut row, status): RawRow) -> Result<CorrectionRow, HandlerErr> {
    row.status = CorrectionStatus::parse(&status)?;
    Ok(row)
}

fn find_request(
    conn: &Connection,
    column: &str,
    value: &str,
) -> Result<Option<CorrectionRow>, HandlerErr> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM correction_requests WHERE {column} = ?");
    conn.query_row(&sql, [value], raw_row)
        .optional()
        .map_err(HandlerErr::query)?
        .map(with_status)
        .transpose()
}

fn load_request(conn: &Connection, request_id: &str) -> Result<CorrectionRow, HandlerErr> {
    find_request(conn, "id", request_id)?.ok_or_else(|| RegistrationError::RequestNotFound.into())
}

fn correction_ensure(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: StudentParams = parse_params(params)?;
    if let Some(row) = find_request(conn, "student_id", &p.student_id)? {
        return Ok(json!({ "request": row.to_json(), "created": false }));
    }
    if !exists(conn, "students", &p.student_id)? {
        return Err(RegistrationError::StudentNotFound.into());
    }
    let id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    conn.execute(
        "INSERT INTO correction_requests(id, student_id, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &p.student_id, CorrectionStatus::Pending.as_str(), &now, &now),
    )
    .map_err(|e| HandlerErr::insert(e, "correction_requests"))?;
    tracing::info!(request = %id, student = %p.student_id, "correction request created");
    let row = load_request(conn, &id)?;
    Ok(json!({ "request": row.to_json(), "created": true }))
}

fn correction_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: RequestParams = parse_params(params)?;
    let row = load_request(conn, &p.request_id)?;
    Ok(json!({ "request": row.to_json() }))
}

fn correction_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: ListParams = parse_params(params)?;
    let status = p
        .status
        .as_deref()
        .map(CorrectionStatus::parse)
        .transpose()?;
    let sql = match status {
        Some(_) => format!(
            "SELECT {REQUEST_COLUMNS} FROM correction_requests WHERE status = ? ORDER BY created_at, id"
        ),
        None => format!("SELECT {REQUEST_COLUMNS} FROM correction_requests ORDER BY created_at, id"),
    };
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let raw = match status {
        Some(s) => stmt
            .query_map([s.as_str()], raw_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], raw_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(HandlerErr::query)?;
    let mut requests = Vec::with_capacity(raw.len());
    for r in raw {
        requests.push(with_status(r)?.to_json());
    }
    Ok(json!({ "requests": requests }))
}

fn set_status(
    conn: &Connection,
    request_id: &str,
    to: CorrectionStatus,
    remarks: Option<String>,
) -> Result<Value, HandlerErr> {
    let row = load_request(conn, request_id)?;
    let next = row.status.transition(to)?;
    let remarks = remarks.map(|r| r.trim().to_string()).or(row.remarks.clone());
    conn.execute(
        "UPDATE correction_requests SET status = ?, remarks = ?, updated_at = ? WHERE id = ?",
        (next.as_str(), &remarks, db::now_rfc3339(), request_id),
    )
    .map_err(|e| HandlerErr::update(e, "correction_requests"))?;
    tracing::info!(
        request = %request_id,
        from = row.status.as_str(),
        to = next.as_str(),
        "correction status changed"
    );
    let row = load_request(conn, request_id)?;
    Ok(json!({ "request": row.to_json() }))
}

fn correction_update_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: UpdateStatusParams = parse_params(params)?;
    let to = CorrectionStatus::parse(&p.status)?;
    set_status(conn, &p.request_id, to, p.remarks)
}

fn correction_approve(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: DecisionParams = parse_params(params)?;
    set_status(conn, &p.request_id, CorrectionStatus::Approved, p.remarks)
}

fn correction_reject(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: DecisionParams = parse_params(params)?;
    set_status(conn, &p.request_id, CorrectionStatus::Rejected, p.remarks)
}

/// Declaration flags only ever go from 0 to 1.
fn mark_declared(conn: &Connection, request_id: &str, column: &str) -> Result<(), HandlerErr> {
    let sql = format!(
        "UPDATE correction_requests SET {column} = 1, updated_at = ? WHERE id = ?"
    );
    conn.execute(&sql, (db::now_rfc3339(), request_id))
        .map_err(|e| HandlerErr::update(e, "correction_requests"))?;
    Ok(())
}

fn correction_submit_personal(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: SubmitPersonalParams = parse_params(params)?;
    load_request(conn, &p.request_id)?;
    let info = serde_json::to_string(&p.personal_info).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE correction_requests SET
           personal_json = ?,
           gender_correction = ?,
           nationality_correction = ?,
           aadhaar_correction = ?,
           apaar_correction = ?
         WHERE id = ?",
        (
            &info,
            p.flags.gender as i64,
            p.flags.nationality as i64,
            p.flags.aadhaar_number as i64,
            p.flags.apaar_id as i64,
            &p.request_id,
        ),
    )
    .map_err(|e| HandlerErr::update(e, "correction_requests"))?;
    mark_declared(&tx, &p.request_id, "personal_declared")?;
    tx.commit().map_err(HandlerErr::tx)?;
    let row = load_request(conn, &p.request_id)?;
    Ok(json!({ "request": row.to_json() }))
}

fn correction_submit_address(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: SubmitAddressParams = parse_params(params)?;
    load_request(conn, &p.request_id)?;
    if p.residential.is_empty() {
        return Err(HandlerErr::bad_params("residential address must not be empty"));
    }
    if p.mailing.is_empty() {
        return Err(HandlerErr::bad_params("mailing address must not be empty"));
    }
    let info = json!({ "residential": p.residential, "mailing": p.mailing }).to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE correction_requests SET address_json = ? WHERE id = ?",
        (&info, &p.request_id),
    )
    .map_err(|e| HandlerErr::update(e, "correction_requests"))?;
    mark_declared(&tx, &p.request_id, "address_declared")?;
    tx.commit().map_err(HandlerErr::tx)?;
    let row = load_request(conn, &p.request_id)?;
    Ok(json!({ "request": row.to_json() }))
}

fn correction_submit_subjects(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: SubmitSubjectsParams = parse_params(params)?;
    load_request(conn, &p.request_id)?;
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE correction_requests SET subjects_correction = ? WHERE id = ?",
        (p.flags.subjects as i64, &p.request_id),
    )
    .map_err(|e| HandlerErr::update(e, "correction_requests"))?;
    mark_declared(&tx, &p.request_id, "subjects_declared")?;
    tx.commit().map_err(HandlerErr::tx)?;
    let row = load_request(conn, &p.request_id)?;
    Ok(json!({ "request": row.to_json() }))
}

/// Stores one file and records it, replacing any earlier upload of the same type.
fn upload_one(
    conn: &Connection,
    workspace: &Path,
    request_id: &str,
    document_type: &str,
    source: &Path,
    limits: &uploads::UploadLimits,
) -> Result<Value, HandlerErr> {
    let document_type = uploads::canonical_document_type(document_type)
        .ok_or_else(|| HandlerErr::bad_params("documentType must contain letters or digits"))?;
    let stored = uploads::store_document(workspace, request_id, &document_type, source, limits)?;
    let previous: Option<String> = conn
        .query_row(
            "SELECT stored_path FROM correction_documents WHERE request_id = ? AND document_type = ?",
            (request_id, &document_type),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let stored_path = stored.stored_path.to_string_lossy().replace('\\', "/");
    if let Some(prev) = previous.filter(|p| *p != stored_path) {
        // Same type, different extension: drop the stale file.
        let _ = std::fs::remove_file(workspace.join(prev));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO correction_documents(id, request_id, document_type, file_name, stored_path, size_bytes, sha256, uploaded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(request_id, document_type) DO UPDATE SET
           file_name = excluded.file_name,
           stored_path = excluded.stored_path,
           size_bytes = excluded.size_bytes,
           sha256 = excluded.sha256,
           uploaded_at = excluded.uploaded_at",
        (
            &id,
            request_id,
            &document_type,
            &stored.file_name,
            &stored_path,
            stored.size_bytes as i64,
            &stored.sha256,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::update(e, "correction_documents"))?;
    let document_id: String = conn
        .query_row(
            "SELECT id FROM correction_documents WHERE request_id = ? AND document_type = ?",
            (request_id, &document_type),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    tracing::info!(
        request = %request_id,
        document_type = %document_type,
        bytes = stored.size_bytes,
        "document uploaded"
    );
    Ok(json!({
        "documentId": document_id,
        "documentType": document_type,
        "fileName": stored.file_name,
        "sizeBytes": stored.size_bytes,
        "sha256": stored.sha256,
    }))
}

fn correction_upload_document(
    conn: &Connection,
    workspace: &Path,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let p: UploadParams = parse_params(params)?;
    load_request(conn, &p.request_id)?;
    let limits = setup::upload_limits(conn).map_err(HandlerErr::query)?;
    let result = upload_one(conn, workspace, &p.request_id, &p.document_type, &p.source_path, &limits);
    if let Err(e) = &result {
        tracing::warn!(request = %p.request_id, document_type = %p.document_type, "upload rejected: {}", e.message);
    }
    let document = result?;
    Ok(json!({ "document": document }))
}

/// Uploads are attempted independently; the declaration is recorded only
/// when the tally allows it.
fn correction_declare_documents(
    conn: &Connection,
    workspace: &Path,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let p: DeclareDocumentsParams = parse_params(params)?;
    load_request(conn, &p.request_id)?;
    let limits = setup::upload_limits(conn).map_err(HandlerErr::query)?;
    let confirm_on_partial = setup::confirm_documents_on_partial_upload(conn).map_err(HandlerErr::query)?;

    let mut results = Vec::with_capacity(p.uploads.len());
    let (mut succeeded, mut failed) = (0usize, 0usize);
    for item in &p.uploads {
        match upload_one(conn, workspace, &p.request_id, &item.document_type, &item.source_path, &limits) {
            Ok(doc) => {
                succeeded += 1;
                results.push(json!({ "documentType": item.document_type, "ok": true, "document": doc }));
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(request = %p.request_id, document_type = %item.document_type, "upload rejected: {}", e.message);
                results.push(json!({
                    "documentType": item.document_type,
                    "ok": false,
                    "error": { "code": e.code, "message": e.message },
                }));
            }
        }
    }

    let tally = UploadTally::of(succeeded, failed);
    let confirmed = tally.confirms(confirm_on_partial);
    if confirmed {
        mark_declared(conn, &p.request_id, "documents_declared")?;
    }
    let row = load_request(conn, &p.request_id)?;
    Ok(json!({
        "tally": tally,
        "succeeded": succeeded,
        "failed": failed,
        "documentsConfirmed": confirmed,
        "results": results,
        "request": row.to_json(),
    }))
}

fn correction_documents(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: RequestParams = parse_params(params)?;
    load_request(conn, &p.request_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, document_type, file_name, size_bytes, sha256, uploaded_at
             FROM correction_documents WHERE request_id = ? ORDER BY document_type",
        )
        .map_err(HandlerErr::query)?;
    let docs = stmt
        .query_map([&p.request_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "documentType": r.get::<_, String>(1)?,
                "fileName": r.get::<_, String>(2)?,
                "sizeBytes": r.get::<_, i64>(3)?,
                "sha256": r.get::<_, String>(4)?,
                "uploadedAt": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "documents": docs }))
}

fn correction_document_path(
    conn: &Connection,
    workspace: &Path,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let p: DocumentParams = parse_params(params)?;
    let (stored, sha256, size): (String, String, i64) = conn
        .query_row(
            "SELECT stored_path, sha256, size_bytes FROM correction_documents WHERE id = ?",
            [&p.document_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or(RegistrationError::DocumentNotFound)?;
    let abs = workspace.join(&stored);
    Ok(json!({
        "path": abs.to_string_lossy(),
        "sha256": sha256,
        "sizeBytes": size,
        "exists": abs.is_file(),
    }))
}

fn correction_pdf_gate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: RequestParams = parse_params(params)?;
    let row = load_request(conn, &p.request_id)?;
    let missing = row.missing_declarations();
    Ok(json!({ "canView": missing.is_empty(), "missing": missing }))
}

fn issued_numbers(conn: &Connection) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT application_number FROM correction_requests WHERE application_number IS NOT NULL")
        .map_err(HandlerErr::query)?;
    let numbers = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(numbers)
}

fn correction_final_submit(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: RequestParams = parse_params(params)?;
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let row = load_request(&tx, &p.request_id)?;
    let missing = row.missing_declarations();
    if !missing.is_empty() {
        return Err(RegistrationError::DeclarationsIncomplete { missing }.into());
    }
    let next = row.status.transition(CorrectionStatus::OnlineRegistrationDone)?;

    let number = match row.application_number.clone() {
        Some(n) => n,
        None => {
            let issued = issued_numbers(&tx)?;
            appno::next_after(issued.iter().map(String::as_str))?
        }
    };
    tx.execute(
        "UPDATE correction_requests SET
           application_number = ?,
           online_registration_done = 1,
           status = ?,
           updated_at = ?
         WHERE id = ?",
        (&number, next.as_str(), db::now_rfc3339(), &p.request_id),
    )
    .map_err(|e| HandlerErr::update(e, "correction_requests"))?;
    tx.commit().map_err(HandlerErr::tx)?;

    tracing::info!(request = %p.request_id, application_number = %number, "registration submitted");
    let row = load_request(conn, &p.request_id)?;
    Ok(json!({ "applicationNumber": number, "request": row.to_json() }))
}

fn correction_next_application_number(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let _: NoParams = parse_params(params)?;
    let issued = issued_numbers(conn)?;
    let next = appno::next_after(issued.iter().map(String::as_str))?;
    Ok(json!({ "applicationNumber": next }))
}

fn correction_validate_application_number(
    conn: &Connection,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let p: ValidateNumberParams = parse_params(params)?;
    let number = p.application_number.trim();
    if appno::parse(number).is_none() {
        return Ok(json!({
            "valid": false,
            "inUse": false,
            "message": "must be 017 followed by four digits (0001-9999)",
        }));
    }
    let in_use = find_request(conn, "application_number", number)?.is_some();
    Ok(json!({ "valid": true, "inUse": in_use }))
}

fn correction_archive(conn: &Connection, workspace: &Path, params: &Value) -> Result<Value, HandlerErr> {
    let p: ArchiveParams = parse_params(params)?;
    let mut stmt = conn
        .prepare(
            "SELECT s.uid, d.document_type, d.file_name, d.sha256, d.stored_path
             FROM correction_documents d
             JOIN correction_requests cr ON cr.id = d.request_id
             JOIN students s ON s.id = cr.student_id
             ORDER BY s.uid, d.document_type",
        )
        .map_err(HandlerErr::query)?;
    let entries = stmt
        .query_map([], |r| {
            Ok(ArchiveEntry {
                uid: r.get(0)?,
                document_type: r.get(1)?,
                file_name: r.get(2)?,
                sha256: r.get(3)?,
                path: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let summary = archive::export_document_archive(workspace, &entries, &p.out_path, &db::now_rfc3339())
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    let manifest = archive::read_manifest(&summary.out_path)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    tracing::info!(out = %summary.out_path.display(), entries = summary.entry_count, "document archive written");
    Ok(json!({
        "outPath": summary.out_path.to_string_lossy(),
        "entryCount": summary.entry_count,
        "documents": manifest.documents,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let with_files: Option<WorkspaceHandler> = match req.method.as_str() {
        "correction.uploadDocument" => Some(correction_upload_document),
        "correction.declareDocuments" => Some(correction_declare_documents),
        "correction.documentPath" => Some(correction_document_path),
        "correction.archive" => Some(correction_archive),
        _ => None,
    };
    if let Some(handler) = with_files {
        return Some(with_workspace(state, req, handler));
    }

    let handler: ConnHandler = match req.method.as_str() {
        "correction.ensure" => correction_ensure,
        "correction.get" => correction_get,
        "correction.list" => correction_list,
        "correction.updateStatus" => correction_update_status,
        "correction.approve" => correction_approve,
        "correction.reject" => correction_reject,
        "correction.submitPersonal" => correction_submit_personal,
        "correction.submitAddress" => correction_submit_address,
        "correction.submitSubjects" => correction_submit_subjects,
        "correction.documents" => correction_documents,
        "correction.pdfGate" => correction_pdf_gate,
        "correction.finalSubmit" => correction_final_submit,
        "correction.nextApplicationNumber" => correction_next_application_number,
        "correction.validateApplicationNumber" => correction_validate_application_number,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
