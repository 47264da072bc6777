use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::model::{normalise, Category, Semester};

/// Semesters a restricted grouping applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Only(BTreeSet<Semester>),
}

impl Scope {
    /// An empty class list on a stored grouping means every semester.
    pub fn from_semesters(semesters: impl IntoIterator<Item = Semester>) -> Self {
        let set: BTreeSet<Semester> = semesters.into_iter().collect();
        if set.is_empty() {
            Scope::All
        } else {
            Scope::Only(set)
        }
    }

    pub fn union(&self, other: &Scope) -> Scope {
        match (self, other) {
            (Scope::Only(a), Scope::Only(b)) => Scope::Only(a.union(b).copied().collect()),
            _ => Scope::All,
        }
    }

    /// No context means the rule applies.
    pub fn applies(&self, context: Option<&[Semester]>) -> bool {
        match (self, context) {
            (Scope::All, _) | (_, None) => true,
            (Scope::Only(set), Some(ctx)) => ctx.iter().any(|s| set.contains(s)),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scope::All => serializer.serialize_str("ALL"),
            Scope::Only(set) => serializer.collect_seq(set.iter()),
        }
    }
}

/// One stored grouping record: `target` may not be combined with any of `cannot_combine_with`.
#[derive(Debug, Clone)]
pub struct GroupingRecord {
    pub target: String,
    pub category: Category,
    pub semesters: Vec<Semester>,
    pub cannot_combine_with: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictedGroupingRule {
    pub target: String,
    pub category_code: Category,
    pub scope: Scope,
    pub cannot_combine_with: BTreeSet<String>,
}

impl RestrictedGroupingRule {
    fn merge(&mut self, scope: &Scope, cannot: impl IntoIterator<Item = String>) {
        self.scope = self.scope.union(scope);
        self.cannot_combine_with.extend(cannot);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestrictedGroupings {
    by_subject: BTreeMap<(Category, String), RestrictedGroupingRule>,
}

impl RestrictedGroupings {
    pub fn build(records: &[GroupingRecord]) -> Self {
        let mut out = Self::default();
        for rec in records {
            let target = normalise(&rec.target);
            if target.is_empty() {
                continue;
            }
            let scope = Scope::from_semesters(rec.semesters.iter().copied());
            let cannot: BTreeSet<String> = rec
                .cannot_combine_with
                .iter()
                .map(|s| normalise(s))
                .filter(|s| !s.is_empty() && *s != target)
                .collect();
            if cannot.is_empty() {
                continue;
            }
            out.insert(rec.category, &target, &scope, cannot.iter().cloned());
            for other in &cannot {
                out.insert(rec.category, other, &scope, [target.clone()]);
            }
        }
        out
    }

    fn insert(
        &mut self,
        category: Category,
        target: &str,
        scope: &Scope,
        cannot: impl IntoIterator<Item = String>,
    ) {
        self.by_subject
            .entry((category, target.to_string()))
            .or_insert_with(|| RestrictedGroupingRule {
                target: target.to_string(),
                category_code: category,
                scope: scope.clone(),
                cannot_combine_with: BTreeSet::new(),
            })
            .merge(scope, cannot);
    }

    pub fn has_category(&self, category: Category) -> bool {
        self.by_subject.keys().any(|(c, _)| *c == category)
    }

    pub fn rule_for(&self, category: Category, subject: &str) -> Option<&RestrictedGroupingRule> {
        self.by_subject.get(&(category, normalise(subject)))
    }

    pub fn rules(&self) -> impl Iterator<Item = &RestrictedGroupingRule> {
        self.by_subject.values()
    }
}
