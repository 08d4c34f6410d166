use std::fmt;

use serde::{Deserialize, Serialize};

/// What to report for scores in [0, 1.00), where the CEFR table has no row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CefrFallback {
    #[default]
    Beginner,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CefrLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
    Unknown,
}

/// Half-open lower bounds, ascending.
const CEFR_FLOORS: [(f64, CefrLevel); 6] = [
    (1.00, CefrLevel::A1),
    (1.50, CefrLevel::A2),
    (2.00, CefrLevel::B1),
    (2.50, CefrLevel::B2),
    (3.00, CefrLevel::C1),
    (4.00, CefrLevel::C2),
];

impl CefrLevel {
    pub fn code(self) -> &'static str {
        match self {
            CefrLevel::A1 => "A1",
            CefrLevel::A2 => "A2",
            CefrLevel::B1 => "B1",
            CefrLevel::B2 => "B2",
            CefrLevel::C1 => "C1",
            CefrLevel::C2 => "C2",
            CefrLevel::Unknown => "?",
        }
    }

    pub fn category(self) -> &'static str {
        match self {
            CefrLevel::A1 => "Beginner",
            CefrLevel::A2 => "Elementary",
            CefrLevel::B1 => "Intermediate",
            CefrLevel::B2 => "Upper Intermediate",
            CefrLevel::C1 => "Proficient",
            CefrLevel::C2 => "Advanced/Native",
            CefrLevel::Unknown => "?",
        }
    }
}

impl fmt::Display for CefrLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code(), self.category())
    }
}

/// Maps a composite score onto the CEFR scale. Scores outside [0, 4] are
/// `Unknown` regardless of the fallback.
pub fn map_level(composite: f64, fallback: CefrFallback) -> CefrLevel {
    if composite.is_nan() || !(0.0..=4.0).contains(&composite) {
        return CefrLevel::Unknown;
    }

    match CEFR_FLOORS
        .iter()
        .rev()
        .find(|(floor, _)| composite >= *floor)
    {
        Some((_, level)) => *level,
        None => match fallback {
            CefrFallback::Beginner => CefrLevel::A1,
            CefrFallback::Unknown => CefrLevel::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn floors_are_inclusive_and_ceilings_exclusive() {
        let level = |score| map_level(score, CefrFallback::Beginner);
        assert_eq!(level(1.0), CefrLevel::A1);
        assert_eq!(level(1.49), CefrLevel::A1);
        assert_eq!(level(1.5), CefrLevel::A2);
        assert_eq!(level(2.0), CefrLevel::B1);
        assert_eq!(level(2.5), CefrLevel::B2);
        assert_eq!(level(2.99), CefrLevel::B2);
        assert_eq!(level(3.0), CefrLevel::C1);
        assert_eq!(level(3.99), CefrLevel::C1);
        assert_eq!(level(4.0), CefrLevel::C2);
    }

    #[test]
    fn scores_below_one_follow_the_fallback() {
        assert_eq!(
            map_level(0.9, CefrFallback::Beginner).to_string(),
            "A1 - Beginner"
        );
        assert_eq!(map_level(0.9, CefrFallback::Unknown).to_string(), "? - ?");
        assert_eq!(map_level(0.0, CefrFallback::Beginner), CefrLevel::A1);
    }

    #[test]
    fn out_of_range_scores_are_unknown() {
        assert_eq!(map_level(-0.5, CefrFallback::Beginner), CefrLevel::Unknown);
        assert_eq!(map_level(4.2, CefrFallback::Beginner), CefrLevel::Unknown);
    }

    #[test]
    fn display_pairs_code_with_category() {
        assert_eq!(CefrLevel::B2.to_string(), "B2 - Upper Intermediate");
        assert_eq!(CefrLevel::C2.to_string(), "C2 - Advanced/Native");
    }

    proptest! {
        #[test]
        fn every_score_from_one_has_a_level(score in 1.0f64..=4.0) {
            prop_assert_ne!(map_level(score, CefrFallback::Unknown), CefrLevel::Unknown);
        }
    }
}
