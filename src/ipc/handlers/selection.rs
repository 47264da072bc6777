use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::setup;
use crate::db;
use crate::ipc::helpers::{parse_params, with_conn, ConnHandler, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::selection::catalogue::{self, LoadedCatalogue};
use crate::selection::model::{SelectionState, Slot};
use crate::selection::persist::build_save_records;
use crate::selection::resolver::{apply_edit, resolve, settle, slot_options};
use crate::selection::validate::validate;
use crate::selection::SelectionError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LoadParams {
    student_id: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ResolveParams {
    student_id: String,
    #[serde(default)]
    session_id: Option<String>,
    selections: SelectionState,
    #[serde(default)]
    revision: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ApplyEditParams {
    student_id: String,
    #[serde(default)]
    session_id: Option<String>,
    selections: SelectionState,
    slot: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    revision: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SaveParams {
    student_id: String,
    #[serde(default)]
    session_id: Option<String>,
    selections: SelectionState,
    #[serde(default)]
    revision: Option<i64>,
    #[serde(default)]
    allow_partial: Option<bool>,
}

fn load_for(
    conn: &Connection,
    student_id: &str,
    session_id: Option<&str>,
) -> Result<LoadedCatalogue, HandlerErr> {
    let settings = setup::subject_selection_settings(conn).map_err(HandlerErr::query)?;
    Ok(catalogue::load(conn, student_id, session_id, settings.policy)?)
}

fn resolution_json(loaded: &LoadedCatalogue, state: &SelectionState) -> Value {
    let r = resolve(&loaded.context, state);
    json!({
        "selections": r.selections,
        "options": r.options,
        "minorMismatch": r.minor_mismatch,
        "issues": r.issues,
        "revision": loaded.revision,
    })
}

fn selection_load(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: LoadParams = parse_params(params)?;
    let loaded = load_for(conn, &p.student_id, p.session_id.as_deref())?;
    let ctx = &loaded.context;

    let labels: BTreeMap<&str, &str> = Slot::ALL
        .into_iter()
        .map(|s| (s.key(), s.label(ctx.is_bcom)))
        .collect();
    let sources: BTreeMap<&str, &Vec<String>> =
        ctx.sources.iter().map(|(k, v)| (k.key(), v)).collect();
    let rules: Vec<_> = ctx.rules.rules().cloned().collect();
    let resolution = resolve(ctx, &loaded.saved);
    let session = loaded
        .session
        .as_ref()
        .map(|s| json!({ "id": s.id, "name": s.name, "isCurrent": s.is_current }));

    Ok(json!({
        "student": {
            "id": loaded.student.id,
            "uid": loaded.student.uid,
            "name": loaded.student.name,
            "programCourseId": loaded.student.program_course_id,
            "programCourseName": loaded.student.program_course_name,
            "streamId": loaded.student.stream_id,
        },
        "session": session,
        "sources": sources,
        "options": resolution.options,
        "autoAssigned": { "minor": ctx.auto_minor, "aec": ctx.auto_aec },
        "mandatory": ctx.mandatory,
        "labels": labels,
        "restrictedGroupings": rules,
        "earlierMinors": ctx.earlier_minors,
        "savedSelections": loaded.saved,
        "selections": resolution.selections,
        "hasExistingSelections": loaded.has_existing,
        "minorMismatch": resolution.minor_mismatch,
        "issues": resolution.issues,
        "revision": loaded.revision,
    }))
}

fn selection_resolve(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: ResolveParams = parse_params(params)?;
    catalogue::check_revision(conn, p.revision)?;
    let loaded = load_for(conn, &p.student_id, p.session_id.as_deref())?;
    Ok(resolution_json(&loaded, &p.selections.normalised()))
}

fn selection_apply_edit(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: ApplyEditParams = parse_params(params)?;
    let slot = Slot::parse(&p.slot).ok_or_else(|| SelectionError::UnknownSlot(p.slot.clone()))?;
    catalogue::check_revision(conn, p.revision)?;
    let loaded = load_for(conn, &p.student_id, p.session_id.as_deref())?;
    let next = apply_edit(&loaded.context, &p.selections.normalised(), slot, p.value)?;
    Ok(resolution_json(&loaded, &next))
}

fn selection_save(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: SaveParams = parse_params(params)?;
    catalogue::check_revision(conn, p.revision)?;
    let settings = setup::subject_selection_settings(conn).map_err(HandlerErr::query)?;
    let loaded = catalogue::load(conn, &p.student_id, p.session_id.as_deref(), settings.policy)?;
    let session = loaded
        .session
        .as_ref()
        .ok_or(SelectionError::SessionNotFound)?;
    let ctx = &loaded.context;

    let state = settle(ctx, &p.selections.normalised());
    for slot in Slot::ALL {
        if let Some(v) = state.get(slot) {
            if !slot_options(ctx, &state, slot).iter().any(|o| o == v) {
                return Err(SelectionError::OptionNotAllowed {
                    slot: slot.key().to_string(),
                    value: v.to_string(),
                }
                .into());
            }
        }
    }
    let issues = validate(ctx, &state);
    if !issues.is_empty() {
        return Err(SelectionError::ValidationFailed(issues).into());
    }

    let batch = build_save_records(
        &state,
        &ctx.subjects,
        &loaded.metas,
        &session.id,
        &loaded.student.id,
        loaded.student.stream_id.as_deref(),
    );
    let allow_partial = p.allow_partial.unwrap_or(settings.allow_partial_save);
    if !batch.unresolved.is_empty() {
        tracing::warn!(
            student = %loaded.student.id,
            unresolved = batch.unresolved.len(),
            allow_partial,
            "selection records could not be resolved"
        );
        if !allow_partial {
            return Err(SelectionError::Unresolved(batch.unresolved).into());
        }
    }

    let now = db::now_rfc3339();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    for rec in &batch.records {
        tx.execute(
            "INSERT INTO student_subject_selections(id, student_id, session_id, meta_id, subject_id, slot, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, session_id, meta_id) DO UPDATE SET
               subject_id = excluded.subject_id,
               slot = excluded.slot,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &rec.student_id,
                &rec.session_id,
                &rec.meta_id,
                &rec.subject_id,
                rec.slot,
                &now,
            ),
        )
        .map_err(|e| HandlerErr::update(e, "student_subject_selections"))?;
    }
    tx.commit().map_err(HandlerErr::tx)?;

    tracing::info!(
        student = %loaded.student.id,
        session = %session.id,
        saved = batch.records.len(),
        slots = ?catalogue::filled_slots(&state),
        "subject selections saved"
    );
    Ok(json!({
        "saved": batch.records,
        "unresolved": batch.unresolved,
        "selections": state,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: ConnHandler = match req.method.as_str() {
        "subjectSelection.load" => selection_load,
        "subjectSelection.resolve" => selection_resolve,
        "subjectSelection.applyEdit" => selection_apply_edit,
        "subjectSelection.save" => selection_save,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
