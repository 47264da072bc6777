use serde::Serialize;

use super::model::{SelectionState, Slot};
use super::resolver::{slot_options, SelectionContext};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub slot: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl Issue {
    fn new(slot: Slot, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            slot: slot.key(),
            code,
            message: message.into(),
        }
    }
}

const IDC_SLOTS: [Slot; 3] = [Slot::Idc1, Slot::Idc2, Slot::Idc3];

/// Issues that block a save. Recomputation carries on regardless.
pub fn validate(ctx: &SelectionContext, state: &SelectionState) -> Vec<Issue> {
    let mut issues = Vec::new();

    for slot in Slot::ALL {
        if state.get(slot).is_none() && !slot_options(ctx, state, slot).is_empty() {
            issues.push(Issue::new(
                slot,
                "required",
                format!("{} is required", slot.label(ctx.is_bcom)),
            ));
        }
    }

    for minor in [Slot::Minor1, Slot::Minor2] {
        let Some(m) = state.get(minor) else { continue };
        for idc in IDC_SLOTS {
            if state.holds(idc, m) {
                issues.push(Issue::new(
                    idc,
                    "minor_idc_conflict",
                    format!("{m} is already chosen as a Minor subject"),
                ));
            }
        }
    }

    for (i, a) in IDC_SLOTS.iter().enumerate() {
        let Some(va) = state.get(*a) else { continue };
        for b in &IDC_SLOTS[i + 1..] {
            if state.holds(*b, va) {
                issues.push(Issue::new(
                    *b,
                    "idc_duplicate",
                    format!("{va} is already chosen for {}", a.key()),
                ));
            }
        }
    }

    if ctx.policy.minor {
        if let Some(auto) = ctx.auto_minor.as_deref() {
            let offered = !ctx.source(Slot::Minor1).is_empty() || !ctx.source(Slot::Minor2).is_empty();
            if offered && !state.holds(Slot::Minor1, auto) && !state.holds(Slot::Minor2, auto) {
                issues.push(Issue::new(
                    Slot::Minor1,
                    "auto_minor_missing",
                    format!("{auto} must be one of the Minor subjects"),
                ));
            }
        }
    }
    if ctx.policy.aec {
        if let Some(auto) = ctx.auto_aec.as_deref() {
            if !state.holds(Slot::Aec3, auto) {
                issues.push(Issue::new(
                    Slot::Aec3,
                    "auto_aec_missing",
                    format!("{auto} must be the AEC subject"),
                ));
            }
        }
    }

    issues
}
