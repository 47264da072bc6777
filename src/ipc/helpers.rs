use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::fees::FeesError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::registration::RegistrationError;
use crate::selection::SelectionError;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn insert(e: impl std::fmt::Display, table: &str) -> Self {
        Self::new("db_insert_failed", e.to_string()).with_details(serde_json::json!({ "table": table }))
    }

    pub fn update(e: impl std::fmt::Display, table: &str) -> Self {
        Self::new("db_update_failed", e.to_string()).with_details(serde_json::json!({ "table": table }))
    }

    pub fn tx(e: impl std::fmt::Display) -> Self {
        Self::new("db_tx_failed", e.to_string())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<SelectionError> for HandlerErr {
    fn from(e: SelectionError) -> Self {
        Self {
            code: e.code(),
            details: e.details(),
            message: format!("{e:#}"),
        }
    }
}

impl From<RegistrationError> for HandlerErr {
    fn from(e: RegistrationError) -> Self {
        Self {
            code: e.code(),
            details: e.details(),
            message: format!("{e:#}"),
        }
    }
}

impl From<FeesError> for HandlerErr {
    fn from(e: FeesError) -> Self {
        Self {
            code: e.code(),
            details: e.details(),
            message: format!("{e:#}"),
        }
    }
}

/// Request params decoded into a typed struct. A missing `params` reads as `{}`.
pub fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, HandlerErr> {
    let v = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(v).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

pub fn required_text(value: &str, key: &str) -> Result<String, HandlerErr> {
    let v = value.trim();
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("{key} must not be empty")));
    }
    Ok(v.to_string())
}

pub fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::query)
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Maps an insert failure, turning uniqueness clashes into `conflict`.
pub fn insert_failed(e: rusqlite::Error, table: &str, what: &str) -> HandlerErr {
    if is_constraint_violation(&e) {
        return HandlerErr::new("conflict", format!("{what} already exists"))
            .with_details(serde_json::json!({ "table": table }));
    }
    HandlerErr::insert(e, table)
}

pub type ConnHandler = fn(&Connection, &Value) -> Result<Value, HandlerErr>;
pub type WorkspaceHandler = fn(&Connection, &Path, &Value) -> Result<Value, HandlerErr>;

pub fn with_conn(state: &AppState, req: &Request, handler: ConnHandler) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match handler(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn with_workspace(state: &AppState, req: &Request, handler: WorkspaceHandler) -> Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match handler(conn, workspace, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}
