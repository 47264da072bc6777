use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::setup::try_handle,
    handlers::students::try_handle,
    handlers::catalogue::try_handle,
    handlers::restricted::try_handle,
    handlers::selection::try_handle,
    handlers::correction::try_handle,
    handlers::fees::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "request");
    for family in FAMILIES {
        if let Some(resp) = family(state, &req) {
            return resp;
        }
    }

    tracing::debug!(method = %req.method, "no handler");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
