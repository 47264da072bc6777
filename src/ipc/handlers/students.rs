use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db;
use crate::ipc::helpers::{
    exists, insert_failed, parse_params, required_text, with_conn, ConnHandler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::selection::catalogue;
use crate::selection::model::Slot;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateParams {
    uid: String,
    name: String,
    program_course_id: String,
    program_course_name: String,
    #[serde(default)]
    stream_id: Option<String>,
    #[serde(default)]
    academic_year: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StudentParams {
    student_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ListParams {
    #[serde(default)]
    program_course_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AdmissionMinorsParams {
    student_id: String,
    subject_ids: Vec<String>,
}

fn student_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "uid": row.get::<_, String>(1)?,
        "name": row.get::<_, String>(2)?,
        "programCourseId": row.get::<_, String>(3)?,
        "programCourseName": row.get::<_, String>(4)?,
        "streamId": row.get::<_, Option<String>>(5)?,
        "academicYear": row.get::<_, Option<String>>(6)?,
    }))
}

const STUDENT_COLUMNS: &str =
    "id, uid, name, program_course_id, program_course_name, stream_id, academic_year";

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: CreateParams = parse_params(params)?;
    let uid = required_text(&p.uid, "uid")?;
    let name = required_text(&p.name, "name")?;
    let program_course_id = required_text(&p.program_course_id, "programCourseId")?;
    let program_course_name = required_text(&p.program_course_name, "programCourseName")?;
    let stream_id = p.stream_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, uid, name, program_course_id, program_course_name, stream_id, academic_year, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &uid,
            &name,
            &program_course_id,
            &program_course_name,
            &stream_id,
            &p.academic_year,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| insert_failed(e, "students", "student uid"))?;

    tracing::info!(student = %id, uid = %uid, "student created");
    Ok(json!({ "studentId": id, "uid": uid }))
}

fn students_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: StudentParams = parse_params(params)?;
    let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?");
    let student = conn
        .query_row(&sql, [&p.student_id], student_json)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    let earlier = catalogue::load_admission_minors(conn, &p.student_id).map_err(HandlerErr::query)?;
    Ok(json!({ "student": student, "admissionMinors": earlier }))
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: ListParams = parse_params(params)?;
    let rows = match p.program_course_id.as_deref() {
        Some(pc) => {
            let sql = format!(
                "SELECT {STUDENT_COLUMNS} FROM students WHERE program_course_id = ? ORDER BY uid"
            );
            let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
            let rows = stmt
                .query_map([pc], student_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            rows
        }
        None => {
            let sql = format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY uid");
            let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
            let rows = stmt
                .query_map([], student_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            rows
        }
    }
    .map_err(HandlerErr::query)?;
    Ok(json!({ "students": rows }))
}

fn students_set_admission_minors(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: AdmissionMinorsParams = parse_params(params)?;
    if p.subject_ids.len() != 2 {
        return Err(HandlerErr::bad_params("subjectIds must hold exactly two subjects"));
    }
    if !exists(conn, "students", &p.student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    for sid in &p.subject_ids {
        if !exists(conn, "subjects", sid)? {
            return Err(HandlerErr::not_found(format!("subject not found: {sid}")));
        }
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "DELETE FROM student_admission_minors WHERE student_id = ?",
        [&p.student_id],
    )
    .map_err(|e| HandlerErr::update(e, "student_admission_minors"))?;
    for (i, sid) in p.subject_ids.iter().enumerate() {
        tx.execute(
            "INSERT INTO student_admission_minors(student_id, position, subject_id) VALUES(?, ?, ?)",
            (&p.student_id, i as i64 + 1, sid),
        )
        .map_err(|e| HandlerErr::insert(e, "student_admission_minors"))?;
    }
    tx.commit().map_err(HandlerErr::tx)?;
    Ok(json!({ "ok": true }))
}

/// One summary card per area: selections for the current session, the
/// correction request and fee totals.
fn students_dashboard(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: StudentParams = parse_params(params)?;
    let student = catalogue::load_student(conn, &p.student_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let session = catalogue::load_session(conn, None).map_err(HandlerErr::query)?;
    let selections = match session.as_ref() {
        Some(s) => {
            let metas = catalogue::load_metas(conn).map_err(HandlerErr::query)?;
            let (state, _) = catalogue::load_saved_selections(conn, &student.id, &s.id, &metas)
                .map_err(HandlerErr::query)?;
            let filled = Slot::ALL
                .into_iter()
                .filter_map(|slot| {
                    state
                        .get(slot)
                        .map(|v| (slot.key().to_string(), Value::String(v.to_string())))
                })
                .collect::<serde_json::Map<_, _>>();
            Some(json!({ "sessionId": s.id, "sessionName": s.name, "slots": filled }))
        }
        None => None,
    };

    let correction = conn
        .query_row(
            "SELECT id, status, application_number, online_registration_done
             FROM correction_requests WHERE student_id = ?",
            [&student.id],
            |r| {
                Ok(json!({
                    "requestId": r.get::<_, String>(0)?,
                    "status": r.get::<_, String>(1)?,
                    "applicationNumber": r.get::<_, Option<String>>(2)?,
                    "onlineRegistrationDone": r.get::<_, i64>(3)? != 0,
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let (payable, paid): (f64, f64) = conn
        .query_row(
            "SELECT COALESCE(SUM(total_payable), 0), COALESCE(SUM(amount_paid), 0)
             FROM student_fee_mappings WHERE student_id = ?",
            [&student.id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "student": {
            "id": student.id,
            "uid": student.uid,
            "name": student.name,
            "programCourseName": student.program_course_name,
        },
        "selections": selections,
        "correction": correction,
        "fees": {
            "totalPayable": payable,
            "totalPaid": paid,
            "outstanding": (payable - paid).max(0.0),
        }
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: ConnHandler = match req.method.as_str() {
        "students.create" => students_create,
        "students.get" => students_get,
        "students.list" => students_list,
        "students.setAdmissionMinors" => students_set_admission_minors,
        "students.dashboard" => students_dashboard,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
