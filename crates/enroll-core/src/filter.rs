//! Competition list filter as selected in the client's two combo boxes.

use serde::{Deserialize, Serialize};

use crate::category::AgeCategory;

/// Sentinel meaning "no type filter".
pub const ALL_COMPETITIONS: &str = "All competitions";
/// Sentinel meaning "no age filter".
pub const ALL_AGES: &str = "All ages";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompetitionFilter {
    All,
    ByType(String),
    ByCategory(AgeCategory),
    ByTypeAndCategory(String, AgeCategory),
    /// Age label outside the category table. Matches no competition.
    UnknownCategory {
        competition_type: Option<String>,
        label: String,
    },
}

/// Raw `{ "type": ..., "age": ... }` payload. Missing keys mean "all".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPayload {
    #[serde(rename = "type", default = "all_competitions")]
    pub competition_type: String,
    #[serde(default = "all_ages")]
    pub age: String,
}

fn all_competitions() -> String {
    ALL_COMPETITIONS.to_string()
}

fn all_ages() -> String {
    ALL_AGES.to_string()
}

impl Default for FilterPayload {
    fn default() -> Self {
        Self {
            competition_type: all_competitions(),
            age: all_ages(),
        }
    }
}

impl From<FilterPayload> for CompetitionFilter {
    fn from(raw: FilterPayload) -> Self {
        let competition_type = (raw.competition_type != ALL_COMPETITIONS).then_some(raw.competition_type);
        if raw.age == ALL_AGES {
            return match competition_type {
                None => Self::All,
                Some(t) => Self::ByType(t),
            };
        }
        match (competition_type, raw.age.parse::<AgeCategory>()) {
            (None, Ok(c)) => Self::ByCategory(c),
            (Some(t), Ok(c)) => Self::ByTypeAndCategory(t, c),
            (competition_type, Err(_)) => Self::UnknownCategory {
                competition_type,
                label: raw.age,
            },
        }
    }
}

impl From<&CompetitionFilter> for FilterPayload {
    fn from(filter: &CompetitionFilter) -> Self {
        let (competition_type, age) = match filter {
            CompetitionFilter::All => (all_competitions(), all_ages()),
            CompetitionFilter::ByType(t) => (t.clone(), all_ages()),
            CompetitionFilter::ByCategory(c) => (all_competitions(), c.label().to_string()),
            CompetitionFilter::ByTypeAndCategory(t, c) => (t.clone(), c.label().to_string()),
            CompetitionFilter::UnknownCategory {
                competition_type,
                label,
            } => (
                competition_type.clone().unwrap_or_else(all_competitions),
                label.clone(),
            ),
        };
        Self { competition_type, age }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> CompetitionFilter {
        let raw: FilterPayload = serde_json::from_str(json).unwrap();
        CompetitionFilter::from(raw)
    }

    #[test]
    fn both_sentinels_mean_all() {
        let f = parse(r#"{"type":"All competitions","age":"All ages"}"#);
        assert_eq!(f, CompetitionFilter::All);
    }

    #[test]
    fn missing_keys_default_to_all() {
        assert_eq!(parse("{}"), CompetitionFilter::All);
    }

    #[test]
    fn type_only() {
        let f = parse(r#"{"type":"Drawing","age":"All ages"}"#);
        assert_eq!(f, CompetitionFilter::ByType("Drawing".into()));
    }

    #[test]
    fn age_only() {
        let f = parse(r#"{"type":"All competitions","age":"9-11 years old"}"#);
        assert_eq!(f, CompetitionFilter::ByCategory(AgeCategory::Middle));
    }

    #[test]
    fn type_and_age() {
        let f = parse(r#"{"type":"Poetry","age":"12-15 years old"}"#);
        assert_eq!(
            f,
            CompetitionFilter::ByTypeAndCategory("Poetry".into(), AgeCategory::Senior)
        );
    }

    #[test]
    fn unknown_age_label_keeps_label_and_type() {
        let f = parse(r#"{"type":"Poetry","age":"teens"}"#);
        assert_eq!(
            f,
            CompetitionFilter::UnknownCategory {
                competition_type: Some("Poetry".into()),
                label: "teens".into(),
            }
        );
        let raw = FilterPayload::from(&f);
        assert_eq!(raw.competition_type, "Poetry");
        assert_eq!(raw.age, "teens");
    }

    #[test]
    fn unknown_age_label_without_type() {
        let f = parse(r#"{"age":"ancient"}"#);
        assert!(matches!(f, CompetitionFilter::UnknownCategory { competition_type: None, .. }));
        assert_eq!(FilterPayload::from(&f).competition_type, ALL_COMPETITIONS);
    }

    #[test]
    fn payload_from_filter_uses_sentinels() {
        let raw = FilterPayload::from(&CompetitionFilter::ByCategory(AgeCategory::Young));
        assert_eq!(raw.competition_type, ALL_COMPETITIONS);
        assert_eq!(raw.age, "6-8 years old");
    }
}
