use serde::Serialize;

use super::model::{Category, SelectionState, Semester, Slot, SubjectOption};

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionMeta {
    pub id: String,
    pub category: Category,
    pub label: String,
    pub sequence: i64,
    pub semesters: Vec<Semester>,
    pub streams: Vec<String>,
}

impl SelectionMeta {
    fn matches(&self, category: Category, semester: Semester, stream: Option<&str>) -> bool {
        if self.category != category {
            return false;
        }
        if let Some(stream) = stream {
            if !self.streams.is_empty() && !self.streams.iter().any(|s| s == stream) {
                return false;
            }
        }
        self.semesters.is_empty() || self.semesters.contains(&semester)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecord {
    pub slot: &'static str,
    pub student_id: String,
    pub session_id: String,
    pub meta_id: String,
    pub subject_id: String,
    pub subject_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnresolvedReason {
    SubjectNotFound,
    MetaNotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unresolved {
    pub slot: &'static str,
    pub subject_name: String,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SaveBatch {
    pub records: Vec<SaveRecord>,
    pub unresolved: Vec<Unresolved>,
}

/// Lowest-sequence meta matching the slot that no earlier slot has taken.
fn unclaimed_meta<'a>(
    metas: &'a [SelectionMeta],
    slot: Slot,
    stream: Option<&str>,
    claimed: &[&str],
) -> Option<&'a SelectionMeta> {
    metas
        .iter()
        .filter(|m| m.matches(slot.category(), slot.meta_semester(), stream))
        .filter(|m| !claimed.contains(&m.id.as_str()))
        .min_by_key(|m| m.sequence)
}

/// Turns filled slots into records. Slots whose subject or meta cannot be
/// found are reported instead of being submitted.
pub fn build_save_records(
    state: &SelectionState,
    catalogue: &[SubjectOption],
    metas: &[SelectionMeta],
    session_id: &str,
    student_id: &str,
    stream: Option<&str>,
) -> SaveBatch {
    let mut batch = SaveBatch::default();
    for slot in Slot::ALL {
        let Some(name) = state.get(slot) else {
            continue;
        };
        let Some(subject) = catalogue.iter().find(|o| o.subject_name == name) else {
            batch.unresolved.push(Unresolved {
                slot: slot.key(),
                subject_name: name.to_string(),
                reason: UnresolvedReason::SubjectNotFound,
            });
            continue;
        };
        // A stored row is keyed by meta, so two slots never share one.
        let claimed: Vec<&str> = batch.records.iter().map(|r| r.meta_id.as_str()).collect();
        let Some(meta) = unclaimed_meta(metas, slot, stream, &claimed) else {
            batch.unresolved.push(Unresolved {
                slot: slot.key(),
                subject_name: name.to_string(),
                reason: UnresolvedReason::MetaNotFound,
            });
            continue;
        };
        batch.records.push(SaveRecord {
            slot: slot.key(),
            student_id: student_id.to_string(),
            session_id: session_id.to_string(),
            meta_id: meta.id.clone(),
            subject_id: subject.subject_id.clone(),
            subject_name: subject.subject_name.clone(),
        });
    }
    batch
}

/// Maps a stored selection back to the slot it fills.
pub fn slot_for_meta(meta: &SelectionMeta, stored_slot: Option<&str>) -> Option<Slot> {
    if let Some(slot) = stored_slot.and_then(Slot::parse) {
        return Some(slot);
    }
    Slot::of_category(meta.category)
        .find(|s| meta.semesters.is_empty() || meta.semesters.contains(&s.meta_semester()))
}
