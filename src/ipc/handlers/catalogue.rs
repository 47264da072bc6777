use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db;
use crate::ipc::helpers::{
    exists, insert_failed, parse_params, required_text, with_conn, ConnHandler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::selection::catalogue as loader;
use crate::selection::model::{Category, Semester};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SubjectCreateParams {
    name: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PaperParams {
    program_course_id: String,
    subject_id: String,
    category_code: String,
    class_name: String,
    #[serde(default)]
    auto_assign: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MandatoryParams {
    program_course_id: String,
    subject_id: String,
    category_code: String,
    class_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ProgramCourseParams {
    program_course_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SessionCreateParams {
    name: String,
    #[serde(default)]
    is_current: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MetaCreateParams {
    category_code: String,
    label: String,
    #[serde(default)]
    sequence: Option<i64>,
    #[serde(default)]
    class_names: Vec<String>,
    #[serde(default)]
    stream_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoParams {}

pub(crate) fn parse_category(raw: &str) -> Result<Category, HandlerErr> {
    Category::from_subject_type(Some(raw), Some(raw))
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown category: {raw}")))
}

pub(crate) fn require_semester(class_name: &str) -> Result<String, HandlerErr> {
    let name = required_text(class_name, "className")?;
    if Semester::from_class_name(&name).is_none() {
        return Err(HandlerErr::bad_params(format!(
            "className has no semester: {name}"
        )));
    }
    Ok(name)
}

/// Runs inside the mutating transaction so a change never lands without its
/// revision.
fn bump(conn: &Connection) -> Result<i64, HandlerErr> {
    db::bump_catalogue_revision(conn).map_err(|e| HandlerErr::update(e, "settings"))
}

fn subjects_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: SubjectCreateParams = parse_params(params)?;
    let name = required_text(&p.name, "name")?;
    let code = p.code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&id, &name, &code),
    )
    .map_err(|e| insert_failed(e, "subjects", "subject name"))?;
    let revision = bump(&tx)?;
    tx.commit().map_err(HandlerErr::tx)?;
    Ok(json!({ "subjectId": id, "name": name, "revision": revision }))
}

fn subjects_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let _: NoParams = parse_params(params)?;
    let mut stmt = conn
        .prepare("SELECT id, name, code FROM subjects ORDER BY name")
        .map_err(HandlerErr::query)?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "subjects": subjects }))
}

fn catalogue_add_option(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: PaperParams = parse_params(params)?;
    let program_course_id = required_text(&p.program_course_id, "programCourseId")?;
    let category = parse_category(&p.category_code)?;
    let class_name = require_semester(&p.class_name)?;
    if !exists(conn, "subjects", &p.subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
    }

    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM paper_options WHERE program_course_id = ?",
            [&program_course_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO paper_options(id, program_course_id, subject_id, category_code, class_name, auto_assign, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &program_course_id,
            &p.subject_id,
            category.code(),
            &class_name,
            p.auto_assign as i64,
            sort_order,
        ),
    )
    .map_err(|e| insert_failed(e, "paper_options", "paper option"))?;
    let revision = bump(&tx)?;
    tx.commit().map_err(HandlerErr::tx)?;
    Ok(json!({ "optionId": id, "sortOrder": sort_order, "revision": revision }))
}

fn catalogue_add_mandatory(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: MandatoryParams = parse_params(params)?;
    let program_course_id = required_text(&p.program_course_id, "programCourseId")?;
    let category = parse_category(&p.category_code)?;
    let class_name = require_semester(&p.class_name)?;
    if !exists(conn, "subjects", &p.subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
    }
    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO mandatory_subjects(id, program_course_id, subject_id, category_code, class_name)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &program_course_id, &p.subject_id, category.code(), &class_name),
    )
    .map_err(|e| insert_failed(e, "mandatory_subjects", "mandatory subject"))?;
    let revision = bump(&tx)?;
    tx.commit().map_err(HandlerErr::tx)?;
    Ok(json!({ "mandatoryId": id, "revision": revision }))
}

fn catalogue_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: ProgramCourseParams = parse_params(params)?;
    let options = loader::load_subject_options(conn, &p.program_course_id).map_err(HandlerErr::query)?;
    let mandatory = loader::load_mandatory(conn, &p.program_course_id).map_err(HandlerErr::query)?;
    let revision = db::catalogue_revision(conn).map_err(HandlerErr::query)?;
    Ok(json!({
        "options": options,
        "mandatory": mandatory,
        "revision": revision,
    }))
}

fn sessions_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: SessionCreateParams = parse_params(params)?;
    let name = required_text(&p.name, "name")?;
    let id = Uuid::new_v4().to_string();

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    if p.is_current {
        tx.execute("UPDATE academic_sessions SET is_current = 0", [])
            .map_err(|e| HandlerErr::update(e, "academic_sessions"))?;
    }
    tx.execute(
        "INSERT INTO academic_sessions(id, name, is_current) VALUES(?, ?, ?)",
        (&id, &name, p.is_current as i64),
    )
    .map_err(|e| insert_failed(e, "academic_sessions", "session name"))?;
    let revision = bump(&tx)?;
    tx.commit().map_err(HandlerErr::tx)?;
    Ok(json!({ "sessionId": id, "revision": revision }))
}

fn sessions_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let _: NoParams = parse_params(params)?;
    let mut stmt = conn
        .prepare("SELECT id, name, is_current FROM academic_sessions ORDER BY name")
        .map_err(HandlerErr::query)?;
    let sessions = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "isCurrent": r.get::<_, i64>(2)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "sessions": sessions }))
}

fn selection_metas_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: MetaCreateParams = parse_params(params)?;
    let category = parse_category(&p.category_code)?;
    let label = required_text(&p.label, "label")?;
    let mut classes = Vec::new();
    for c in &p.class_names {
        classes.push(require_semester(c)?);
    }

    let sequence = match p.sequence {
        Some(s) => s,
        None => conn
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM selection_metas",
                [],
                |r| r.get(0),
            )
            .map_err(HandlerErr::query)?,
    };

    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO selection_metas(id, category_code, label, sequence) VALUES(?, ?, ?, ?)",
        (&id, category.code(), &label, sequence),
    )
    .map_err(|e| HandlerErr::insert(e, "selection_metas"))?;
    for c in &classes {
        tx.execute(
            "INSERT OR IGNORE INTO selection_meta_classes(meta_id, class_name) VALUES(?, ?)",
            (&id, c),
        )
        .map_err(|e| HandlerErr::insert(e, "selection_meta_classes"))?;
    }
    for s in p.stream_ids.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        tx.execute(
            "INSERT OR IGNORE INTO selection_meta_streams(meta_id, stream_id) VALUES(?, ?)",
            (&id, s),
        )
        .map_err(|e| HandlerErr::insert(e, "selection_meta_streams"))?;
    }
    let revision = bump(&tx)?;
    tx.commit().map_err(HandlerErr::tx)?;
    Ok(json!({ "metaId": id, "sequence": sequence, "revision": revision }))
}

fn selection_metas_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let _: NoParams = parse_params(params)?;
    let metas = loader::load_metas(conn).map_err(HandlerErr::query)?;
    let metas: Vec<Value> = metas
        .into_iter()
        .map(|m| {
            json!({
                "id": m.id,
                "categoryCode": m.category,
                "label": m.label,
                "sequence": m.sequence,
                "semesters": m.semesters,
                "streamIds": m.streams,
            })
        })
        .collect();
    Ok(json!({ "metas": metas }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: ConnHandler = match req.method.as_str() {
        "subjects.create" => subjects_create,
        "subjects.list" => subjects_list,
        "catalogue.addOption" => catalogue_add_option,
        "catalogue.addMandatory" => catalogue_add_mandatory,
        "catalogue.list" => catalogue_list,
        "sessions.create" => sessions_create,
        "sessions.list" => sessions_list,
        "selectionMetas.create" => selection_metas_create,
        "selectionMetas.list" => selection_metas_list,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
