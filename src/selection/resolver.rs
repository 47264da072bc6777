use std::collections::BTreeMap;

use serde::Serialize;

use super::filter::filter_options;
use super::mismatch;
use super::model::{same_subject, MandatorySubjectEntry, SelectionState, Semester, Slot, SubjectOption};
use super::rules::RestrictedGroupings;
use super::validate::{validate, Issue};
use super::SelectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoAssignPolicy {
    pub minor: bool,
    pub aec: bool,
}

impl Default for AutoAssignPolicy {
    fn default() -> Self {
        Self {
            minor: true,
            aec: true,
        }
    }
}

/// Everything the recompute pass needs about one student's catalogue.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    pub subjects: Vec<SubjectOption>,
    pub mandatory: Vec<MandatorySubjectEntry>,
    pub sources: BTreeMap<Slot, Vec<String>>,
    pub auto_minor: Option<String>,
    pub auto_aec: Option<String>,
    pub rules: RestrictedGroupings,
    pub is_bcom: bool,
    pub earlier_minors: Option<[String; 2]>,
    pub policy: AutoAssignPolicy,
}

impl SelectionContext {
    /// Flattens paper options into per-slot source lists in catalogue order.
    /// Mandatory subjects never appear as optional choices for their own
    /// category and semester.
    pub fn new(
        subjects: Vec<SubjectOption>,
        mandatory: Vec<MandatorySubjectEntry>,
        rules: RestrictedGroupings,
        is_bcom: bool,
    ) -> Self {
        let mut sources = BTreeMap::new();
        for slot in Slot::ALL {
            let mut list: Vec<String> = Vec::new();
            for opt in &subjects {
                if opt.category_code != slot.category()
                    || !slot.option_semesters().contains(&opt.semester)
                {
                    continue;
                }
                let is_mandatory = mandatory.iter().any(|m| {
                    m.category_code == opt.category_code
                        && m.semester == opt.semester
                        && same_subject(&m.subject_name, &opt.subject_name)
                });
                if is_mandatory || list.iter().any(|n| same_subject(n, &opt.subject_name)) {
                    continue;
                }
                list.push(opt.subject_name.clone());
            }
            sources.insert(slot, list);
        }

        let auto_minor = first_auto(&subjects, Slot::Minor1, &[Semester::I, Semester::II]);
        let auto_aec = first_auto(&subjects, Slot::Aec3, &[Semester::III, Semester::IV]);

        Self {
            subjects,
            mandatory,
            sources,
            auto_minor,
            auto_aec,
            rules,
            is_bcom,
            earlier_minors: None,
            policy: AutoAssignPolicy::default(),
        }
    }

    pub fn source(&self, slot: Slot) -> &[String] {
        self.sources.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The catalogue's spelling of `value` among the slot's source options.
    fn catalogue_spelling(&self, slot: Slot, value: &str) -> Option<&str> {
        self.source(slot)
            .iter()
            .find(|o| same_subject(o, value))
            .map(String::as_str)
    }

    fn active_auto_minor(&self) -> Option<&str> {
        self.auto_minor.as_deref().filter(|_| self.policy.minor)
    }

    fn active_auto_aec(&self) -> Option<&str> {
        self.auto_aec.as_deref().filter(|_| self.policy.aec)
    }
}

fn first_auto(subjects: &[SubjectOption], slot: Slot, semesters: &[Semester]) -> Option<String> {
    subjects
        .iter()
        .find(|o| {
            o.is_auto_assigned && o.category_code == slot.category() && semesters.contains(&o.semester)
        })
        .map(|o| o.subject_name.clone())
}

/// Filtered dropdown list for one slot. IDC slots additionally never offer a
/// subject already chosen as a Minor.
pub fn slot_options(ctx: &SelectionContext, state: &SelectionState, slot: Slot) -> Vec<String> {
    let current = state.get(slot);
    let mut out = filter_options(
        ctx.source(slot),
        current,
        slot.category(),
        Some(slot.filter_context(ctx.is_bcom)),
        state,
        &ctx.rules,
    );
    if matches!(slot, Slot::Idc1 | Slot::Idc2 | Slot::Idc3) {
        let minors: Vec<&str> = [Slot::Minor1, Slot::Minor2]
            .into_iter()
            .filter_map(|s| state.get(s))
            .collect();
        out.retain(|cand| {
            current.is_some_and(|c| same_subject(c, cand))
                || !minors.iter().any(|m| same_subject(m, cand))
        });
    }
    out
}

fn allows(ctx: &SelectionContext, state: &SelectionState, slot: Slot, subject: &str) -> bool {
    slot_options(ctx, state, slot)
        .iter()
        .any(|o| same_subject(o, subject))
}

/// Rewrites each held value to its catalogue spelling so later exact-name
/// lookups match. Values not in the slot's source are left for the caller to
/// reject.
fn canonicalise(ctx: &SelectionContext, state: &SelectionState) -> SelectionState {
    let mut next = state.clone();
    for slot in Slot::ALL {
        let spelled = state
            .get(slot)
            .and_then(|v| ctx.catalogue_spelling(slot, v))
            .map(str::to_string);
        if spelled.is_some() {
            next.set(slot, spelled);
        }
    }
    next
}

/// Single deterministic pass placing the auto-assigned subjects. Running it on
/// its own output changes nothing.
pub fn settle(ctx: &SelectionContext, state: &SelectionState) -> SelectionState {
    let mut next = canonicalise(ctx, state);

    if let Some(auto) = ctx.active_auto_minor() {
        let placed = next.holds(Slot::Minor1, auto) || next.holds(Slot::Minor2, auto);
        if !placed {
            let order: &[Slot] = match (next.get(Slot::Minor1), next.get(Slot::Minor2)) {
                (None, None) => &[Slot::Minor1, Slot::Minor2],
                (None, Some(_)) => &[Slot::Minor1],
                (Some(_), None) => &[Slot::Minor2],
                (Some(_), Some(_)) => &[Slot::Minor2, Slot::Minor1],
            };
            if let Some(slot) = order.iter().copied().find(|s| allows(ctx, &next, *s, auto)) {
                next.set(slot, Some(auto.to_string()));
            }
        }
    }

    if let Some(auto) = ctx.active_auto_aec() {
        if next.get(Slot::Aec3).is_none() && allows(ctx, &next, Slot::Aec3, auto) {
            next.set(Slot::Aec3, Some(auto.to_string()));
        }
    }

    next
}

/// Applies one user edit. A value not currently on offer is rejected; a Minor
/// edit that displaces the auto subject moves it into the sibling slot.
pub fn apply_edit(
    ctx: &SelectionContext,
    state: &SelectionState,
    slot: Slot,
    value: Option<String>,
) -> Result<SelectionState, SelectionError> {
    let value = value.filter(|v| !v.trim().is_empty());
    if let Some(v) = value.as_deref() {
        if !allows(ctx, state, slot, v) {
            return Err(SelectionError::OptionNotAllowed {
                slot: slot.key().to_string(),
                value: v.to_string(),
            });
        }
    }

    let mut next = state.clone();
    let displaced = state.get(slot).map(str::to_string);
    next.set(slot, value.clone());

    if let (Some(auto), Some(sibling), Some(new_value)) =
        (ctx.active_auto_minor(), slot.minor_sibling(), value.as_deref())
    {
        let lost_auto = displaced.as_deref().is_some_and(|d| same_subject(d, auto))
            && !same_subject(new_value, auto);
        if lost_auto && !next.holds(sibling, auto) && allows(ctx, &next, sibling, auto) {
            next.set(sibling, Some(auto.to_string()));
        }
    }

    Ok(settle(ctx, &next))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub selections: SelectionState,
    pub options: BTreeMap<&'static str, Vec<String>>,
    pub minor_mismatch: bool,
    pub issues: Vec<Issue>,
}

/// Settles the state and derives everything the form shows from it.
pub fn resolve(ctx: &SelectionContext, state: &SelectionState) -> Resolution {
    let selections = settle(ctx, state);
    let options = Slot::ALL
        .into_iter()
        .map(|slot| (slot.key(), slot_options(ctx, &selections, slot)))
        .collect();
    let earlier = ctx
        .earlier_minors
        .as_ref()
        .map(|[a, b]| [a.as_str(), b.as_str()]);
    let minor_mismatch = mismatch::detect(
        [selections.get(Slot::Minor1), selections.get(Slot::Minor2)],
        earlier,
    );
    let issues = validate(ctx, &selections);
    Resolution {
        selections,
        options,
        minor_mismatch,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::model::Category;
    use crate::selection::rules::GroupingRecord;

    fn opt(name: &str, cat: Category, sem: Semester, auto: bool) -> SubjectOption {
        SubjectOption {
            subject_id: format!("id-{}", name.to_lowercase()),
            subject_name: name.to_string(),
            category_code: cat,
            semester: sem,
            is_auto_assigned: auto,
        }
    }

    fn minor_ctx(rules: Vec<GroupingRecord>) -> SelectionContext {
        let subjects = vec![
            opt("Environmental Studies", Category::Minor, Semester::I, true),
            opt("Mathematics", Category::Minor, Semester::I, false),
            opt("Statistics", Category::Minor, Semester::I, false),
            opt("Environmental Studies", Category::Minor, Semester::III, false),
            opt("Mathematics", Category::Minor, Semester::III, false),
            opt("Statistics", Category::Minor, Semester::III, false),
            opt("Physics", Category::Minor, Semester::III, false),
            opt("English Communication", Category::AbilityEnhancement, Semester::III, true),
            opt("Hindi Communication", Category::AbilityEnhancement, Semester::III, false),
            opt("Economics", Category::Interdisciplinary, Semester::I, false),
            opt("History", Category::Interdisciplinary, Semester::I, false),
            opt("Mathematics", Category::Interdisciplinary, Semester::I, false),
        ];
        SelectionContext::new(subjects, vec![], RestrictedGroupings::build(&rules), false)
    }

    #[test]
    fn settle_places_auto_subjects_and_is_idempotent() {
        let ctx = minor_ctx(vec![]);
        let once = settle(&ctx, &SelectionState::default());
        assert_eq!(once.minor1.as_deref(), Some("Environmental Studies"));
        assert_eq!(once.minor2, None);
        assert_eq!(once.aec3.as_deref(), Some("English Communication"));
        assert_eq!(settle(&ctx, &once), once);
    }

    #[test]
    fn settle_fills_empty_sibling_when_user_picked_first() {
        let ctx = minor_ctx(vec![]);
        let state = SelectionState {
            minor1: Some("Mathematics".into()),
            ..Default::default()
        };
        let out = settle(&ctx, &state);
        assert_eq!(out.minor1.as_deref(), Some("Mathematics"));
        assert_eq!(out.minor2.as_deref(), Some("Environmental Studies"));
    }

    #[test]
    fn edits_take_the_catalogue_spelling() {
        let ctx = minor_ctx(vec![]);
        let start = settle(&ctx, &SelectionState::default());
        let out = apply_edit(&ctx, &start, Slot::Minor1, Some(" mathematics".into())).unwrap();
        assert_eq!(out.minor1.as_deref(), Some("Mathematics"));
        assert_eq!(out.minor2.as_deref(), Some("Environmental Studies"));

        let typed = SelectionState {
            idc1: Some("ECONOMICS".into()),
            ..out.clone()
        };
        assert_eq!(settle(&ctx, &typed).idc1.as_deref(), Some("Economics"));
    }

    #[test]
    fn replacing_auto_subject_relocates_it() {
        let ctx = minor_ctx(vec![]);
        let start = settle(&ctx, &SelectionState::default());
        let out = apply_edit(&ctx, &start, Slot::Minor1, Some("Mathematics".into())).unwrap();
        assert_eq!(out.minor1.as_deref(), Some("Mathematics"));
        assert_eq!(out.minor2.as_deref(), Some("Environmental Studies"));

        // Sequence of edits keeps the auto subject in exactly one Minor slot.
        let out = apply_edit(&ctx, &out, Slot::Minor2, Some("Physics".into())).unwrap();
        let holders = [Slot::Minor1, Slot::Minor2]
            .into_iter()
            .filter(|s| out.holds(*s, "Environmental Studies"))
            .count();
        assert_eq!(holders, 1);
        assert_eq!(out.minor1.as_deref(), Some("Environmental Studies"));
        assert_eq!(out.minor2.as_deref(), Some("Physics"));
    }

    #[test]
    fn edit_outside_options_is_rejected() {
        let ctx = minor_ctx(vec![]);
        let start = settle(&ctx, &SelectionState::default());
        let err = apply_edit(&ctx, &start, Slot::Minor1, Some("Chemistry".into())).unwrap_err();
        assert_eq!(err.code(), "option_not_allowed");
    }

    #[test]
    fn restricted_auto_subject_is_not_forced() {
        let ctx = minor_ctx(vec![GroupingRecord {
            target: "Environmental Studies".into(),
            category: Category::Minor,
            semesters: vec![],
            cannot_combine_with: vec!["Statistics".into()],
        }]);
        let state = SelectionState {
            minor1: Some("Statistics".into()),
            ..Default::default()
        };
        let out = settle(&ctx, &state);
        assert_eq!(out.minor2, None);
    }

    #[test]
    fn policy_switch_disables_auto_assignment() {
        let mut ctx = minor_ctx(vec![]);
        ctx.policy = AutoAssignPolicy {
            minor: false,
            aec: false,
        };
        assert_eq!(settle(&ctx, &SelectionState::default()), SelectionState::default());
    }

    #[test]
    fn idc_slots_skip_chosen_minors() {
        let ctx = minor_ctx(vec![]);
        let state = SelectionState {
            minor1: Some("Mathematics".into()),
            ..Default::default()
        };
        let idc = slot_options(&ctx, &state, Slot::Idc1);
        assert_eq!(idc, vec!["Economics".to_string(), "History".to_string()]);
    }

    #[test]
    fn mandatory_subjects_leave_optional_lists() {
        let subjects = vec![
            opt("English", Category::AbilityEnhancement, Semester::III, false),
            opt("Bengali", Category::AbilityEnhancement, Semester::III, false),
        ];
        let mandatory = vec![MandatorySubjectEntry {
            category_code: Category::AbilityEnhancement,
            semester: Semester::III,
            subject_name: "english".into(),
        }];
        let ctx = SelectionContext::new(subjects, mandatory, RestrictedGroupings::default(), false);
        assert_eq!(ctx.source(Slot::Aec3), &["Bengali".to_string()]);
    }

    #[test]
    fn resolve_reports_mismatch_against_admission_pair() {
        let mut ctx = minor_ctx(vec![]);
        ctx.earlier_minors = Some(["Statistics".into(), "Environmental Studies".into()]);
        let state = SelectionState {
            minor1: Some("Environmental Studies".into()),
            minor2: Some("Statistics".into()),
            ..Default::default()
        };
        assert!(!resolve(&ctx, &state).minor_mismatch);

        let state = SelectionState {
            minor1: Some("Environmental Studies".into()),
            minor2: Some("Physics".into()),
            ..Default::default()
        };
        assert!(resolve(&ctx, &state).minor_mismatch);
    }
}
