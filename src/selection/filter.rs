use super::model::{normalise, same_subject, Category, SelectionState, Semester, Slot};
use super::rules::RestrictedGroupings;

/// Candidates for one dropdown given everything else already chosen.
///
/// Siblings are the values held by slots of the same category, minus the
/// slot's own current value. A candidate is dropped when it duplicates a
/// sibling, when an in-context sibling rule forbids it, or when its own
/// in-context rule forbids a sibling. `current` always survives so the user
/// can keep or revert it.
pub fn filter_options(
    source: &[String],
    current: Option<&str>,
    category: Category,
    context: Option<&[Semester]>,
    state: &SelectionState,
    rules: &RestrictedGroupings,
) -> Vec<String> {
    let siblings: Vec<String> = Slot::of_category(category)
        .filter_map(|slot| state.get(slot))
        .filter(|v| current.map_or(true, |c| !same_subject(v, c)))
        .map(normalise)
        .collect();
    let apply_rules = rules.has_category(category);

    source
        .iter()
        .filter(|candidate| {
            if current.is_some_and(|c| same_subject(candidate, c)) {
                return true;
            }
            let cand = normalise(candidate);
            if siblings.contains(&cand) {
                return false;
            }
            if !apply_rules {
                return true;
            }
            for sib in &siblings {
                if let Some(rule) = rules.rule_for(category, sib) {
                    if rule.scope.applies(context) && rule.cannot_combine_with.contains(&cand) {
                        return false;
                    }
                }
            }
            if let Some(own) = rules.rule_for(category, &cand) {
                if own.scope.applies(context)
                    && siblings.iter().any(|s| own.cannot_combine_with.contains(s))
                {
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::rules::GroupingRecord;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn math_stats_rule() -> RestrictedGroupings {
        RestrictedGroupings::build(&[GroupingRecord {
            target: "Mathematics".into(),
            category: Category::Minor,
            semesters: vec![Semester::I, Semester::II],
            cannot_combine_with: vec!["Statistics".into()],
        }])
    }

    #[test]
    fn idc_sibling_is_excluded_but_others_stay() {
        let state = SelectionState {
            idc1: Some("Economics".into()),
            ..Default::default()
        };
        let out = filter_options(
            &names(&["Economics", "History", "Geography"]),
            None,
            Category::Interdisciplinary,
            Some(&[Semester::I]),
            &state,
            &RestrictedGroupings::default(),
        );
        assert_eq!(out, names(&["History", "Geography"]));
    }

    #[test]
    fn rule_outside_context_does_not_exclude() {
        let rules = math_stats_rule();
        let state = SelectionState {
            minor1: Some("Mathematics".into()),
            ..Default::default()
        };
        let source = names(&["Statistics", "Physics"]);

        let later = filter_options(
            &source,
            None,
            Category::Minor,
            Some(&[Semester::III, Semester::IV]),
            &state,
            &rules,
        );
        assert_eq!(later, names(&["Statistics", "Physics"]));

        let early = filter_options(
            &source,
            None,
            Category::Minor,
            Some(&[Semester::I, Semester::II]),
            &state,
            &rules,
        );
        assert_eq!(early, names(&["Physics"]));
    }

    #[test]
    fn exclusion_holds_in_both_directions() {
        let rules = math_stats_rule();
        let ctx = Some(&[Semester::I][..]);

        let with_math = SelectionState {
            minor1: Some("Mathematics".into()),
            ..Default::default()
        };
        let out = filter_options(
            &names(&["Statistics"]),
            None,
            Category::Minor,
            ctx,
            &with_math,
            &rules,
        );
        assert!(out.is_empty());

        let with_stats = SelectionState {
            minor2: Some("statistics".into()),
            ..Default::default()
        };
        let out = filter_options(
            &names(&["Mathematics"]),
            None,
            Category::Minor,
            ctx,
            &with_stats,
            &rules,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn category_without_rules_only_dedupes() {
        let rules = math_stats_rule();
        let state = SelectionState {
            idc1: Some("Mathematics".into()),
            idc2: Some("Music".into()),
            ..Default::default()
        };
        let out = filter_options(
            &names(&["Mathematics", "Statistics", "Music", "Art"]),
            Some("Music"),
            Category::Interdisciplinary,
            None,
            &state,
            &rules,
        );
        assert_eq!(out, names(&["Statistics", "Music", "Art"]));
    }

    #[test]
    fn current_value_is_always_kept() {
        let rules = math_stats_rule();
        let state = SelectionState {
            minor1: Some("Mathematics".into()),
            minor2: Some("Statistics".into()),
            ..Default::default()
        };
        let out = filter_options(
            &names(&["Statistics", "Physics"]),
            Some("Statistics"),
            Category::Minor,
            None,
            &state,
            &rules,
        );
        assert_eq!(out, names(&["Statistics", "Physics"]));
    }
}
