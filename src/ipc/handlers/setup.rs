use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::registration::uploads::UploadLimits;
use crate::selection::resolver::AutoAssignPolicy;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    SubjectSelection,
    Uploads,
    Registration,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::SubjectSelection, Self::Uploads, Self::Registration];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "subjectSelection" => Some(Self::SubjectSelection),
            "uploads" => Some(Self::Uploads),
            "registration" => Some(Self::Registration),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::SubjectSelection => "subjectSelection",
            Self::Uploads => "uploads",
            Self::Registration => "registration",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::SubjectSelection => "setup.subjectSelection",
            Self::Uploads => "setup.uploads",
            Self::Registration => "setup.registration",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::SubjectSelection => json!({
            "autoAssignMinor": true,
            "autoAssignAec": true,
            "allowPartialSave": false
        }),
        SetupSection::Uploads => json!({
            "photoMaxKb": 100,
            "otherMaxKb": 250
        }),
        SetupSection::Registration => json!({
            "confirmDocumentsOnPartialUpload": false
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::SubjectSelection => match k.as_str() {
                "autoAssignMinor" | "autoAssignAec" | "allowPartialSave" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown subjectSelection field: {}", k)),
            },
            SetupSection::Uploads => match k.as_str() {
                "photoMaxKb" | "otherMaxKb" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 10, 5120)?));
                }
                _ => return Err(format!("unknown uploads field: {}", k)),
            },
            SetupSection::Registration => match k.as_str() {
                "confirmDocumentsOnPartialUpload" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown registration field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn section_bool(section: &Value, key: &str, default: bool) -> bool {
    section.get(key).and_then(Value::as_bool).unwrap_or(default)
}

#[derive(Debug, Clone, Copy)]
pub struct SubjectSelectionSettings {
    pub policy: AutoAssignPolicy,
    pub allow_partial_save: bool,
}

pub fn subject_selection_settings(
    conn: &rusqlite::Connection,
) -> anyhow::Result<SubjectSelectionSettings> {
    let s = load_section(conn, SetupSection::SubjectSelection)?;
    Ok(SubjectSelectionSettings {
        policy: AutoAssignPolicy {
            minor: section_bool(&s, "autoAssignMinor", true),
            aec: section_bool(&s, "autoAssignAec", true),
        },
        allow_partial_save: section_bool(&s, "allowPartialSave", false),
    })
}

pub fn upload_limits(conn: &rusqlite::Connection) -> anyhow::Result<UploadLimits> {
    let s = load_section(conn, SetupSection::Uploads)?;
    let kb = |key: &str, default: u64| s.get(key).and_then(Value::as_u64).unwrap_or(default);
    Ok(UploadLimits {
        photo_max_kb: kb("photoMaxKb", 100),
        other_max_kb: kb("otherMaxKb", 250),
    })
}

pub fn confirm_documents_on_partial_upload(conn: &rusqlite::Connection) -> anyhow::Result<bool> {
    let s = load_section(conn, SetupSection::Registration)?;
    Ok(section_bool(&s, "confirmDocumentsOnPartialUpload", false))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup section updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_rejects_out_of_range_upload_cap() {
        let mut current = default_section(SetupSection::Uploads);
        let patch = json!({ "photoMaxKb": 5 });
        let msg = merge_section_patch(
            SetupSection::Uploads,
            &mut current,
            patch.as_object().unwrap(),
        )
        .unwrap_err();
        assert!(msg.contains("photoMaxKb"));
        assert_eq!(current["photoMaxKb"], json!(100));
    }

    #[test]
    fn patch_rejects_unknown_field() {
        let mut current = default_section(SetupSection::SubjectSelection);
        let patch = json!({ "autoAssignCvac": true });
        assert!(merge_section_patch(
            SetupSection::SubjectSelection,
            &mut current,
            patch.as_object().unwrap()
        )
        .is_err());
    }
}
