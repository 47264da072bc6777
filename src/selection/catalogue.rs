use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};

use super::model::{
    is_bcom_program, Category, MandatorySubjectEntry, SelectionState, Semester, Slot, SubjectOption,
};
use super::persist::{slot_for_meta, SelectionMeta};
use super::resolver::{AutoAssignPolicy, SelectionContext};
use super::rules::{GroupingRecord, RestrictedGroupings};
use super::SelectionError;
use crate::db;

#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub id: String,
    pub uid: String,
    pub name: String,
    pub program_course_id: String,
    pub program_course_name: String,
    pub stream_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AcademicSession {
    pub id: String,
    pub name: String,
    pub is_current: bool,
}

/// Everything loaded for one student's selection form.
#[derive(Debug, Clone)]
pub struct LoadedCatalogue {
    pub student: StudentRecord,
    pub session: Option<AcademicSession>,
    pub context: SelectionContext,
    pub metas: Vec<SelectionMeta>,
    pub saved: SelectionState,
    pub has_existing: bool,
    pub revision: i64,
}

pub fn load_student(conn: &Connection, student_id: &str) -> anyhow::Result<Option<StudentRecord>> {
    conn.query_row(
        "SELECT id, uid, name, program_course_id, program_course_name, stream_id
         FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentRecord {
                id: r.get(0)?,
                uid: r.get(1)?,
                name: r.get(2)?,
                program_course_id: r.get(3)?,
                program_course_name: r.get(4)?,
                stream_id: r.get(5)?,
            })
        },
    )
    .optional()
    .context("load student")
}

fn session_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AcademicSession> {
    Ok(AcademicSession {
        id: r.get(0)?,
        name: r.get(1)?,
        is_current: r.get::<_, i64>(2)? != 0,
    })
}

/// The given session, or the one flagged current.
pub fn load_session(
    conn: &Connection,
    session_id: Option<&str>,
) -> anyhow::Result<Option<AcademicSession>> {
    let out = match session_id {
        Some(id) => conn
            .query_row(
                "SELECT id, name, is_current FROM academic_sessions WHERE id = ?",
                [id],
                session_from_row,
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT id, name, is_current FROM academic_sessions
                 WHERE is_current = 1 ORDER BY name DESC LIMIT 1",
                [],
                session_from_row,
            )
            .optional(),
    };
    out.context("load academic session")
}

pub fn load_subject_options(
    conn: &Connection,
    program_course_id: &str,
) -> anyhow::Result<Vec<SubjectOption>> {
    let mut stmt = conn.prepare(
        "SELECT po.subject_id, s.name, po.category_code, po.class_name, po.auto_assign
         FROM paper_options po
         JOIN subjects s ON s.id = po.subject_id
         WHERE po.program_course_id = ?
         ORDER BY po.sort_order, s.name",
    )?;
    let rows = stmt
        .query_map([program_course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)? != 0,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("load paper options")?;

    // Options outside the four categories or without a recognisable semester
    // never reach a slot.
    Ok(rows
        .into_iter()
        .filter_map(|(subject_id, subject_name, code, class_name, auto)| {
            Some(SubjectOption {
                subject_id,
                subject_name,
                category_code: Category::parse_code(&code)?,
                semester: Semester::from_class_name(&class_name)?,
                is_auto_assigned: auto,
            })
        })
        .collect())
}

pub fn load_mandatory(
    conn: &Connection,
    program_course_id: &str,
) -> anyhow::Result<Vec<MandatorySubjectEntry>> {
    let mut stmt = conn.prepare(
        "SELECT m.category_code, m.class_name, s.name
         FROM mandatory_subjects m
         JOIN subjects s ON s.id = m.subject_id
         WHERE m.program_course_id = ?
         ORDER BY m.category_code, m.class_name, s.name",
    )?;
    let rows = stmt
        .query_map([program_course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("load mandatory subjects")?;
    Ok(rows
        .into_iter()
        .filter_map(|(code, class_name, subject_name)| {
            Some(MandatorySubjectEntry {
                category_code: Category::parse_code(&code)?,
                semester: Semester::from_class_name(&class_name)?,
                subject_name,
            })
        })
        .collect())
}

pub fn load_grouping_records(
    conn: &Connection,
    program_course_id: &str,
) -> anyhow::Result<Vec<GroupingRecord>> {
    let mut stmt = conn.prepare(
        "SELECT rg.id, rg.category_code, s.name
         FROM restricted_groupings rg
         JOIN subjects s ON s.id = rg.subject_id
         WHERE rg.program_course_id = ?
         ORDER BY s.name",
    )?;
    let heads = stmt
        .query_map([program_course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("load restricted groupings")?;

    let mut class_stmt = conn.prepare(
        "SELECT class_name FROM restricted_grouping_classes WHERE restricted_grouping_id = ?",
    )?;
    let mut cannot_stmt = conn.prepare(
        "SELECT s.name FROM restricted_grouping_subjects rs
         JOIN subjects s ON s.id = rs.subject_id
         WHERE rs.restricted_grouping_id = ?
         ORDER BY s.name",
    )?;

    let mut out = Vec::new();
    for (id, code, target) in heads {
        let Some(category) = Category::parse_code(&code) else {
            continue;
        };
        let classes = class_stmt
            .query_map([&id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let semesters: Vec<Semester> = classes
            .iter()
            .filter_map(|c| Semester::from_class_name(c))
            .collect();
        if semesters.len() != classes.len() {
            tracing::warn!(grouping = %id, ?classes, "restricted grouping has unrecognised classes");
            // An empty list reads as every semester; never widen a scoped rule.
            if semesters.is_empty() {
                continue;
            }
        }
        let cannot_combine_with = cannot_stmt
            .query_map([&id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(GroupingRecord {
            target,
            category,
            semesters,
            cannot_combine_with,
        });
    }
    Ok(out)
}

pub fn load_metas(conn: &Connection) -> anyhow::Result<Vec<SelectionMeta>> {
    let mut stmt = conn.prepare(
        "SELECT id, category_code, label, sequence FROM selection_metas ORDER BY sequence, label",
    )?;
    let heads = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("load selection metas")?;

    let mut class_stmt =
        conn.prepare("SELECT class_name FROM selection_meta_classes WHERE meta_id = ?")?;
    let mut stream_stmt =
        conn.prepare("SELECT stream_id FROM selection_meta_streams WHERE meta_id = ? ORDER BY stream_id")?;

    let mut out = Vec::new();
    for (id, code, label, sequence) in heads {
        let Some(category) = Category::parse_code(&code) else {
            continue;
        };
        let semesters = class_stmt
            .query_map([&id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .filter_map(|c| Semester::from_class_name(c))
            .collect();
        let streams = stream_stmt
            .query_map([&id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(SelectionMeta {
            id,
            category,
            label,
            sequence,
            semesters,
            streams,
        });
    }
    Ok(out)
}

/// The Minor pair recorded at admission, when both are known.
pub fn load_admission_minors(
    conn: &Connection,
    student_id: &str,
) -> anyhow::Result<Option<[String; 2]>> {
    let mut stmt = conn.prepare(
        "SELECT s.name FROM student_admission_minors am
         JOIN subjects s ON s.id = am.subject_id
         WHERE am.student_id = ?
         ORDER BY am.position",
    )?;
    let names = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()
        .context("load admission minors")?;
    match names.as_slice() {
        [a, b, ..] => Ok(Some([a.clone(), b.clone()])),
        _ => Ok(None),
    }
}

pub fn load_saved_selections(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
    metas: &[SelectionMeta],
) -> anyhow::Result<(SelectionState, bool)> {
    let mut stmt = conn.prepare(
        "SELECT sel.meta_id, sel.slot, s.name
         FROM student_subject_selections sel
         JOIN subjects s ON s.id = sel.subject_id
         WHERE sel.student_id = ? AND sel.session_id = ?
         ORDER BY sel.updated_at",
    )?;
    let rows = stmt
        .query_map([student_id, session_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("load saved selections")?;

    let mut state = SelectionState::default();
    let found = !rows.is_empty();
    for (meta_id, slot, name) in rows {
        let Some(meta) = metas.iter().find(|m| m.id == meta_id) else {
            continue;
        };
        if let Some(slot) = slot_for_meta(meta, slot.as_deref()) {
            state.set(slot, Some(name));
        }
    }
    Ok((state, found))
}

/// Builds the selection context for a student, without anything stored for a session.
pub fn load_context(
    conn: &Connection,
    student: &StudentRecord,
    policy: AutoAssignPolicy,
) -> anyhow::Result<SelectionContext> {
    let subjects = load_subject_options(conn, &student.program_course_id)?;
    let mandatory = load_mandatory(conn, &student.program_course_id)?;
    let records = load_grouping_records(conn, &student.program_course_id)?;
    let mut ctx = SelectionContext::new(
        subjects,
        mandatory,
        RestrictedGroupings::build(&records),
        is_bcom_program(&student.program_course_name),
    );
    ctx.earlier_minors = load_admission_minors(conn, &student.id)?;
    ctx.policy = policy;
    Ok(ctx)
}

pub fn load(
    conn: &Connection,
    student_id: &str,
    session_id: Option<&str>,
    policy: AutoAssignPolicy,
) -> Result<LoadedCatalogue, SelectionError> {
    let student = load_student(conn, student_id)?.ok_or(SelectionError::StudentNotFound)?;
    let session = load_session(conn, session_id)?;
    if session_id.is_some() && session.is_none() {
        return Err(SelectionError::SessionNotFound);
    }
    let context = load_context(conn, &student, policy)?;
    let metas = load_metas(conn)?;
    let (saved, has_existing) = match session.as_ref() {
        Some(s) => load_saved_selections(conn, &student.id, &s.id, &metas)?,
        None => (SelectionState::default(), false),
    };
    let revision = db::catalogue_revision(conn)?;
    Ok(LoadedCatalogue {
        student,
        session,
        context,
        metas,
        saved,
        has_existing,
        revision,
    })
}

/// Rejects requests computed against an older catalogue.
pub fn check_revision(conn: &Connection, given: Option<i64>) -> Result<(), SelectionError> {
    let Some(given) = given else {
        return Ok(());
    };
    let current = db::catalogue_revision(conn)?;
    if current != given {
        tracing::warn!(current, given, "stale catalogue revision");
        return Err(SelectionError::StaleCatalogue { current, given });
    }
    Ok(())
}

/// Slots in saving order, for log lines.
pub fn filled_slots(state: &SelectionState) -> Vec<&'static str> {
    Slot::ALL
        .into_iter()
        .filter(|s| state.get(*s).is_some())
        .map(Slot::key)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouping(conn: &Connection, id: &str, target: &str, partner: &str, classes: &[&str]) {
        conn.execute(
            "INSERT INTO restricted_groupings(id, program_course_id, category_code, subject_id, updated_at)
             VALUES(?, 'pc', 'MN', ?, '2025-01-01T00:00:00Z')",
            (id, target),
        )
        .unwrap();
        conn.execute(
            "INSERT INTO restricted_grouping_subjects(restricted_grouping_id, subject_id) VALUES(?, ?)",
            (id, partner),
        )
        .unwrap();
        for c in classes {
            conn.execute(
                "INSERT INTO restricted_grouping_classes(restricted_grouping_id, class_name) VALUES(?, ?)",
                (id, c),
            )
            .unwrap();
        }
    }

    #[test]
    fn unrecognised_grouping_classes_never_widen_scope() {
        let dir = tempfile::tempdir().unwrap();
        let conn = db::open_db(dir.path()).unwrap();
        for (id, name) in [("maths", "Mathematics"), ("stats", "Statistics"), ("evs", "Environmental Studies")] {
            conn.execute("INSERT INTO subjects(id, name) VALUES(?, ?)", (id, name))
                .unwrap();
        }
        grouping(&conn, "g-old", "maths", "stats", &["Annual"]);
        grouping(&conn, "g-mixed", "evs", "stats", &["Semester III", "Final Year"]);
        grouping(&conn, "g-all", "stats", "evs", &[]);

        let records = load_grouping_records(&conn, "pc").unwrap();
        let targets: Vec<&str> = records.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["Environmental Studies", "Statistics"]);
        assert_eq!(records[0].semesters, vec![Semester::III]);
        assert!(records[1].semesters.is_empty());
    }
}
