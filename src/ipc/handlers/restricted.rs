use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::catalogue::{parse_category, require_semester};
use crate::db;
use crate::ipc::helpers::{exists, parse_params, required_text, with_conn, ConnHandler, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::selection::catalogue as loader;
use crate::selection::rules::RestrictedGroupings;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpsertParams {
    program_course_id: String,
    category_code: String,
    subject_id: String,
    #[serde(default)]
    class_names: Vec<String>,
    cannot_combine_with_subject_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ListParams {
    program_course_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DeleteParams {
    restricted_grouping_id: String,
}

/// One grouping per (program course, category, subject). Upserting replaces
/// its class scope and its cannot-combine list.
fn restricted_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: UpsertParams = parse_params(params)?;
    let program_course_id = required_text(&p.program_course_id, "programCourseId")?;
    let category = parse_category(&p.category_code)?;
    let mut classes = Vec::new();
    for c in &p.class_names {
        classes.push(require_semester(c)?);
    }
    if !exists(conn, "subjects", &p.subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
    }
    let mut cannot: Vec<&str> = Vec::new();
    for sid in &p.cannot_combine_with_subject_ids {
        if sid == &p.subject_id {
            return Err(HandlerErr::bad_params(
                "a subject cannot be restricted against itself",
            ));
        }
        if !exists(conn, "subjects", sid)? {
            return Err(HandlerErr::not_found(format!("subject not found: {sid}")));
        }
        if !cannot.contains(&sid.as_str()) {
            cannot.push(sid);
        }
    }
    if cannot.is_empty() {
        return Err(HandlerErr::bad_params(
            "cannotCombineWithSubjectIds must not be empty",
        ));
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM restricted_groupings
             WHERE program_course_id = ? AND category_code = ? AND subject_id = ?",
            (&program_course_id, category.code(), &p.subject_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let created = existing.is_none();
    let id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    if created {
        tx.execute(
            "INSERT INTO restricted_groupings(id, program_course_id, category_code, subject_id, updated_at)
             VALUES(?, ?, ?, ?, ?)",
            (&id, &program_course_id, category.code(), &p.subject_id, db::now_rfc3339()),
        )
        .map_err(|e| HandlerErr::insert(e, "restricted_groupings"))?;
    } else {
        tx.execute(
            "UPDATE restricted_groupings SET updated_at = ? WHERE id = ?",
            (db::now_rfc3339(), &id),
        )
        .map_err(|e| HandlerErr::update(e, "restricted_groupings"))?;
        tx.execute(
            "DELETE FROM restricted_grouping_classes WHERE restricted_grouping_id = ?",
            [&id],
        )
        .map_err(|e| HandlerErr::update(e, "restricted_grouping_classes"))?;
        tx.execute(
            "DELETE FROM restricted_grouping_subjects WHERE restricted_grouping_id = ?",
            [&id],
        )
        .map_err(|e| HandlerErr::update(e, "restricted_grouping_subjects"))?;
    }
    for c in &classes {
        tx.execute(
            "INSERT OR IGNORE INTO restricted_grouping_classes(restricted_grouping_id, class_name) VALUES(?, ?)",
            (&id, c),
        )
        .map_err(|e| HandlerErr::insert(e, "restricted_grouping_classes"))?;
    }
    for sid in &cannot {
        tx.execute(
            "INSERT INTO restricted_grouping_subjects(restricted_grouping_id, subject_id) VALUES(?, ?)",
            (&id, sid),
        )
        .map_err(|e| HandlerErr::insert(e, "restricted_grouping_subjects"))?;
    }
    let revision = db::bump_catalogue_revision(&tx).map_err(|e| HandlerErr::update(e, "settings"))?;
    tx.commit().map_err(HandlerErr::tx)?;
    tracing::info!(grouping = %id, created, "restricted grouping saved");
    Ok(json!({ "restrictedGroupingId": id, "created": created, "revision": revision }))
}

fn restricted_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: ListParams = parse_params(params)?;
    let mut stmt = conn
        .prepare(
            "SELECT rg.id, rg.category_code, rg.subject_id, s.name, rg.updated_at
             FROM restricted_groupings rg
             JOIN subjects s ON s.id = rg.subject_id
             WHERE rg.program_course_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::query)?;
    let heads = stmt
        .query_map([&p.program_course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut class_stmt = conn
        .prepare(
            "SELECT class_name FROM restricted_grouping_classes
             WHERE restricted_grouping_id = ? ORDER BY class_name",
        )
        .map_err(HandlerErr::query)?;
    let mut cannot_stmt = conn
        .prepare(
            "SELECT s.id, s.name FROM restricted_grouping_subjects rs
             JOIN subjects s ON s.id = rs.subject_id
             WHERE rs.restricted_grouping_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::query)?;

    let mut groupings = Vec::new();
    for (id, code, subject_id, subject_name, updated_at) in heads {
        let classes = class_stmt
            .query_map([&id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        let cannot = cannot_stmt
            .query_map([&id], |r| {
                Ok(json!({
                    "subjectId": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        groupings.push(json!({
            "id": id,
            "categoryCode": code,
            "subjectId": subject_id,
            "subjectName": subject_name,
            "classNames": classes,
            "cannotCombineWith": cannot,
            "updatedAt": updated_at,
        }));
    }

    let records = loader::load_grouping_records(conn, &p.program_course_id).map_err(HandlerErr::query)?;
    let rules: Vec<_> = RestrictedGroupings::build(&records).rules().cloned().collect();
    Ok(json!({ "groupings": groupings, "rules": rules }))
}

fn restricted_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: DeleteParams = parse_params(params)?;
    if !exists(conn, "restricted_groupings", &p.restricted_grouping_id)? {
        return Err(HandlerErr::not_found("restricted grouping not found"));
    }
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    for sql in [
        "DELETE FROM restricted_grouping_classes WHERE restricted_grouping_id = ?",
        "DELETE FROM restricted_grouping_subjects WHERE restricted_grouping_id = ?",
        "DELETE FROM restricted_groupings WHERE id = ?",
    ] {
        tx.execute(sql, [&p.restricted_grouping_id])
            .map_err(|e| HandlerErr::update(e, "restricted_groupings"))?;
    }
    let revision = db::bump_catalogue_revision(&tx).map_err(|e| HandlerErr::update(e, "settings"))?;
    tx.commit().map_err(HandlerErr::tx)?;
    tracing::info!(grouping = %p.restricted_grouping_id, "restricted grouping deleted");
    Ok(json!({ "ok": true, "revision": revision }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: ConnHandler = match req.method.as_str() {
        "restrictedGroupings.upsert" => restricted_upsert,
        "restrictedGroupings.list" => restricted_list,
        "restrictedGroupings.delete" => restricted_delete,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
