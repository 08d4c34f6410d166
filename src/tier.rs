use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BandColor {
    Red,
    Yellow,
    Green,
    DarkBlue,
    Black,
}

impl BandColor {
    pub fn as_str(self) -> &'static str {
        match self {
            BandColor::Red => "red",
            BandColor::Yellow => "yellow",
            BandColor::Green => "green",
            BandColor::DarkBlue => "dark-blue",
            BandColor::Black => "black",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ProficiencyTier {
    Beginning,
    LowAcquisition,
    HighAcquisition,
    Emerging,
    LowDeveloping,
    HighDeveloping,
    LowProficient,
    Proficient,
    HighProficient,
    Advanced,
    HighAdvanced,
    NativeBilingual,
    Unknown,
}

/// Inclusive upper bounds, ascending.
const TIER_BOUNDS: [(f64, ProficiencyTier); 12] = [
    (0.00, ProficiencyTier::Beginning),
    (0.50, ProficiencyTier::LowAcquisition),
    (0.75, ProficiencyTier::HighAcquisition),
    (1.00, ProficiencyTier::Emerging),
    (1.25, ProficiencyTier::LowDeveloping),
    (1.50, ProficiencyTier::HighDeveloping),
    (1.75, ProficiencyTier::LowProficient),
    (2.00, ProficiencyTier::Proficient),
    (2.25, ProficiencyTier::HighProficient),
    (2.50, ProficiencyTier::Advanced),
    (3.00, ProficiencyTier::HighAdvanced),
    (4.00, ProficiencyTier::NativeBilingual),
];

impl ProficiencyTier {
    pub fn label(self) -> &'static str {
        match self {
            ProficiencyTier::Beginning => "Beginning",
            ProficiencyTier::LowAcquisition => "Low Acquisition",
            ProficiencyTier::HighAcquisition => "High Acquisition",
            ProficiencyTier::Emerging => "Emerging",
            ProficiencyTier::LowDeveloping => "Low Developing",
            ProficiencyTier::HighDeveloping => "High Developing",
            ProficiencyTier::LowProficient => "Low Proficient",
            ProficiencyTier::Proficient => "Proficient",
            ProficiencyTier::HighProficient => "High Proficient",
            ProficiencyTier::Advanced => "Advanced",
            ProficiencyTier::HighAdvanced => "High Advanced",
            ProficiencyTier::NativeBilingual => "Native/Bilingual",
            ProficiencyTier::Unknown => "Unknown",
        }
    }

    pub fn color(self) -> BandColor {
        match self {
            ProficiencyTier::Beginning
            | ProficiencyTier::LowAcquisition
            | ProficiencyTier::HighAcquisition => BandColor::Red,
            ProficiencyTier::Emerging
            | ProficiencyTier::LowDeveloping
            | ProficiencyTier::HighDeveloping
            | ProficiencyTier::LowProficient => BandColor::Yellow,
            ProficiencyTier::Proficient
            | ProficiencyTier::HighProficient
            | ProficiencyTier::Advanced => BandColor::Green,
            ProficiencyTier::HighAdvanced | ProficiencyTier::NativeBilingual => BandColor::DarkBlue,
            ProficiencyTier::Unknown => BandColor::Black,
        }
    }

    /// Tiers in ascending order, without the `Unknown` sentinel.
    pub fn ladder() -> impl Iterator<Item = ProficiencyTier> {
        TIER_BOUNDS.iter().map(|(_, tier)| *tier)
    }
}

impl fmt::Display for ProficiencyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// First tier whose upper bound the composite does not exceed. Scores below
/// zero, above 4.00, or NaN are `Unknown`.
pub fn classify(composite: f64) -> ProficiencyTier {
    if composite.is_nan() || composite < 0.0 {
        return ProficiencyTier::Unknown;
    }

    TIER_BOUNDS
        .iter()
        .find(|(bound, _)| composite <= *bound)
        .map(|(_, tier)| *tier)
        .unwrap_or(ProficiencyTier::Unknown)
}
