use serde::{Deserialize, Serialize};

/// Subject-type categories that take part in selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "MN")]
    Minor,
    #[serde(rename = "IDC")]
    Interdisciplinary,
    #[serde(rename = "AEC")]
    AbilityEnhancement,
    #[serde(rename = "CVAC")]
    CommonValueAdded,
}

impl Category {
    pub fn code(self) -> &'static str {
        match self {
            Self::Minor => "MN",
            Self::Interdisciplinary => "IDC",
            Self::AbilityEnhancement => "AEC",
            Self::CommonValueAdded => "CVAC",
        }
    }

    pub fn parse_code(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MN" => Some(Self::Minor),
            "IDC" => Some(Self::Interdisciplinary),
            "AEC" => Some(Self::AbilityEnhancement),
            "CVAC" => Some(Self::CommonValueAdded),
            _ => None,
        }
    }

    /// Subject types arrive either as a code or as a descriptive name.
    pub fn from_subject_type(code: Option<&str>, name: Option<&str>) -> Option<Self> {
        if let Some(c) = code.and_then(Self::parse_code) {
            return Some(c);
        }
        let name = name?.trim().to_ascii_uppercase();
        if name.contains("MINOR") {
            Some(Self::Minor)
        } else if name.contains("INTERDISCIPLINARY") || name.contains("INTER DISCIPLINARY") {
            Some(Self::Interdisciplinary)
        } else if name.contains("ABILITY ENHANCEMENT") {
            Some(Self::AbilityEnhancement)
        } else if name.contains("COMMON VALUE ADDED") {
            Some(Self::CommonValueAdded)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Semester {
    I,
    II,
    III,
    IV,
    V,
    VI,
}

impl Semester {
    pub const ALL: [Semester; 6] = [
        Semester::I,
        Semester::II,
        Semester::III,
        Semester::IV,
        Semester::V,
        Semester::VI,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::I => "I",
            Self::II => "II",
            Self::III => "III",
            Self::IV => "IV",
            Self::V => "V",
            Self::VI => "VI",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|sem| sem.as_str() == t)
    }

    fn from_digit(s: &str) -> Option<Self> {
        match s {
            "1" => Some(Self::I),
            "2" => Some(Self::II),
            "3" => Some(Self::III),
            "4" => Some(Self::IV),
            "5" => Some(Self::V),
            "6" => Some(Self::VI),
            _ => None,
        }
    }

    /// "SEMESTER III" → III, "Sem 4" → IV. A roman token anywhere in the name
    /// wins over a digit token.
    pub fn from_class_name(name: &str) -> Option<Self> {
        let tokens: Vec<&str> = name
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        tokens
            .iter()
            .find_map(|t| Self::parse(t))
            .or_else(|| tokens.iter().find_map(|t| Self::from_digit(t)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Minor1,
    Minor2,
    Idc1,
    Idc2,
    Idc3,
    Aec3,
    Cvac4,
}

impl Slot {
    pub const ALL: [Slot; 7] = [
        Slot::Minor1,
        Slot::Minor2,
        Slot::Idc1,
        Slot::Idc2,
        Slot::Idc3,
        Slot::Aec3,
        Slot::Cvac4,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Minor1 => "minor1",
            Self::Minor2 => "minor2",
            Self::Idc1 => "idc1",
            Self::Idc2 => "idc2",
            Self::Idc3 => "idc3",
            Self::Aec3 => "aec3",
            Self::Cvac4 => "cvac4",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.key() == s)
    }

    pub fn category(self) -> Category {
        match self {
            Self::Minor1 | Self::Minor2 => Category::Minor,
            Self::Idc1 | Self::Idc2 | Self::Idc3 => Category::Interdisciplinary,
            Self::Aec3 => Category::AbilityEnhancement,
            Self::Cvac4 => Category::CommonValueAdded,
        }
    }

    /// Semesters whose paper options feed this slot.
    pub fn option_semesters(self) -> &'static [Semester] {
        match self {
            Self::Minor1 => &[Semester::I, Semester::II],
            Self::Minor2 | Self::Aec3 => &[Semester::III, Semester::IV],
            Self::Idc1 => &[Semester::I],
            Self::Idc2 | Self::Cvac4 => &[Semester::II],
            Self::Idc3 => &[Semester::III],
        }
    }

    /// Semesters used to decide whether a restricted grouping applies.
    pub fn filter_context(self, is_bcom: bool) -> &'static [Semester] {
        match self {
            Self::Minor2 if is_bcom => &[Semester::III],
            other => other.option_semesters(),
        }
    }

    /// Semester used to pick the selection meta a saved record belongs to.
    pub fn meta_semester(self) -> Semester {
        match self {
            Self::Minor1 | Self::Idc1 => Semester::I,
            Self::Idc2 | Self::Cvac4 => Semester::II,
            Self::Minor2 | Self::Idc3 | Self::Aec3 => Semester::III,
        }
    }

    pub fn label(self, is_bcom: bool) -> &'static str {
        match self {
            Self::Minor1 => "Minor I (Semester I & II)",
            Self::Minor2 if is_bcom => "Minor III (Semester III)",
            Self::Minor2 => "Minor II (Semester III & IV)",
            Self::Idc1 => "IDC 1 (Semester I)",
            Self::Idc2 => "IDC 2 (Semester II)",
            Self::Idc3 => "IDC 3 (Semester III)",
            Self::Aec3 => "AEC (Semester III & IV)",
            Self::Cvac4 => "CVAC 4 (Semester II)",
        }
    }

    pub fn minor_sibling(self) -> Option<Slot> {
        match self {
            Self::Minor1 => Some(Self::Minor2),
            Self::Minor2 => Some(Self::Minor1),
            _ => None,
        }
    }

    pub fn of_category(category: Category) -> impl Iterator<Item = Slot> {
        Self::ALL.into_iter().filter(move |s| s.category() == category)
    }
}

pub fn is_bcom_program(program_course_name: &str) -> bool {
    program_course_name
        .to_lowercase()
        .chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .collect::<String>()
        .contains("bcom")
}

/// Subject names compare trimmed and upper-cased.
pub fn normalise(name: &str) -> String {
    name.trim().to_uppercase()
}

pub fn same_subject(a: &str, b: &str) -> bool {
    normalise(a) == normalise(b)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionState {
    #[serde(default)]
    pub minor1: Option<String>,
    #[serde(default)]
    pub minor2: Option<String>,
    #[serde(default)]
    pub idc1: Option<String>,
    #[serde(default)]
    pub idc2: Option<String>,
    #[serde(default)]
    pub idc3: Option<String>,
    #[serde(default)]
    pub aec3: Option<String>,
    #[serde(default)]
    pub cvac4: Option<String>,
}

impl SelectionState {
    pub fn get(&self, slot: Slot) -> Option<&str> {
        let v = match slot {
            Slot::Minor1 => &self.minor1,
            Slot::Minor2 => &self.minor2,
            Slot::Idc1 => &self.idc1,
            Slot::Idc2 => &self.idc2,
            Slot::Idc3 => &self.idc3,
            Slot::Aec3 => &self.aec3,
            Slot::Cvac4 => &self.cvac4,
        };
        v.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn set(&mut self, slot: Slot, value: Option<String>) {
        let value = value.filter(|s| !s.trim().is_empty());
        match slot {
            Slot::Minor1 => self.minor1 = value,
            Slot::Minor2 => self.minor2 = value,
            Slot::Idc1 => self.idc1 = value,
            Slot::Idc2 => self.idc2 = value,
            Slot::Idc3 => self.idc3 = value,
            Slot::Aec3 => self.aec3 = value,
            Slot::Cvac4 => self.cvac4 = value,
        }
    }

    /// Blank strings from clients become empty slots.
    pub fn normalised(mut self) -> Self {
        for slot in Slot::ALL {
            let v = self.get(slot).map(str::to_string);
            self.set(slot, v);
        }
        self
    }

    pub fn holds(&self, slot: Slot, subject: &str) -> bool {
        self.get(slot).is_some_and(|v| same_subject(v, subject))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectOption {
    pub subject_id: String,
    pub subject_name: String,
    pub category_code: Category,
    pub semester: Semester,
    pub is_auto_assigned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MandatorySubjectEntry {
    pub category_code: Category,
    pub semester: Semester,
    pub subject_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semester_prefers_roman_token_over_digit() {
        assert_eq!(Semester::from_class_name("SEMESTER III"), Some(Semester::III));
        assert_eq!(Semester::from_class_name("Sem 4"), Some(Semester::IV));
        assert_eq!(Semester::from_class_name("Year 1 Semester II"), Some(Semester::II));
        assert_eq!(Semester::from_class_name("Semester VII"), None);
        assert_eq!(Semester::from_class_name("FIRST YEAR"), None);
        // "VI" inside a longer word is not a token.
        assert_eq!(Semester::from_class_name("DIVISION"), None);
    }

    #[test]
    fn category_falls_back_to_type_name() {
        assert_eq!(Category::from_subject_type(Some("mn"), None), Some(Category::Minor));
        assert_eq!(
            Category::from_subject_type(Some("XYZ"), Some("Inter Disciplinary Course")),
            Some(Category::Interdisciplinary)
        );
        assert_eq!(
            Category::from_subject_type(None, Some("Ability Enhancement Compulsory")),
            Some(Category::AbilityEnhancement)
        );
        assert_eq!(Category::from_subject_type(None, Some("Major")), None);
    }

    #[test]
    fn bcom_detection_ignores_dots_and_spaces() {
        assert!(is_bcom_program("B.Com (Honours)"));
        assert!(is_bcom_program("B Com General"));
        assert!(!is_bcom_program("B.Sc Physics"));
        assert_eq!(Slot::Minor2.label(true), "Minor III (Semester III)");
        assert_eq!(Slot::Minor2.filter_context(true), &[Semester::III]);
        assert_eq!(Slot::Minor2.filter_context(false), &[Semester::III, Semester::IV]);
    }

    #[test]
    fn blank_values_read_as_empty_slots() {
        let mut state = SelectionState {
            minor1: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(state.get(Slot::Minor1), None);
        state.set(Slot::Idc1, Some("History".into()));
        assert!(state.holds(Slot::Idc1, " history "));
    }
}
