use serde::{Deserialize, Serialize};

use crate::cefr::{self, CefrFallback, CefrLevel};
use crate::models::{CategorySelections, RatingRecord, SubScore};
use crate::rubric::{self, RubricVersion};
use crate::tier::{self, ProficiencyTier};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AveragingPolicy {
    /// Mean over ratings above zero; zero when none are.
    #[default]
    ZeroExclusive,
    /// Mean over the full category set, unset ratings counted as zero.
    FixedDenominator,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoringPolicy {
    pub averaging: AveragingPolicy,
    pub cefr_fallback: CefrFallback,
}

/// Every derived field of one evaluation row. Averages keep full precision;
/// use [`round2`] or the `display_*` accessors for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreCard {
    pub ratings: Vec<RatingRecord>,
    pub pronunciation_average: f64,
    pub grammar_average: f64,
    pub fluency_average: f64,
    pub epgf_average: f64,
    pub tier: ProficiencyTier,
    pub cefr: CefrLevel,
}

impl ScoreCard {
    pub fn sub_score(&self, sub_score: SubScore) -> f64 {
        match sub_score {
            SubScore::Pronunciation => self.pronunciation_average,
            SubScore::Grammar => self.grammar_average,
            SubScore::Fluency => self.fluency_average,
        }
    }

    pub fn display_epgf(&self) -> f64 {
        round2(self.epgf_average)
    }

    pub fn proficiency_level(&self) -> &'static str {
        self.tier.label()
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Zero-exclusive mean: averages only the values above zero.
pub fn positive_mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .filter(|value| *value > 0.0)
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Combines the resolved ratings of one sub-score's categories.
pub fn aggregate_sub_score(
    ratings: &[RatingRecord],
    sub_score: SubScore,
    policy: AveragingPolicy,
) -> f64 {
    let values = ratings
        .iter()
        .filter(|record| record.category.sub_score() == sub_score)
        .map(|record| record.rating);

    match policy {
        AveragingPolicy::ZeroExclusive => positive_mean(values),
        AveragingPolicy::FixedDenominator => {
            values.sum::<f64>() / sub_score.categories().len() as f64
        }
    }
}

/// Overall score: mean of the sub-scores above zero.
pub fn composite(pronunciation: f64, grammar: f64, fluency: f64) -> f64 {
    positive_mean([pronunciation, grammar, fluency])
}

/// Scores already-resolved ratings.
pub fn score_ratings(ratings: Vec<RatingRecord>, policy: ScoringPolicy) -> ScoreCard {
    let pronunciation_average =
        aggregate_sub_score(&ratings, SubScore::Pronunciation, policy.averaging);
    let grammar_average = aggregate_sub_score(&ratings, SubScore::Grammar, policy.averaging);
    let fluency_average = aggregate_sub_score(&ratings, SubScore::Fluency, policy.averaging);
    let epgf_average = composite(pronunciation_average, grammar_average, fluency_average);

    ScoreCard {
        ratings,
        pronunciation_average,
        grammar_average,
        fluency_average,
        epgf_average,
        tier: tier::classify(epgf_average),
        cefr: cefr::map_level(epgf_average, policy.cefr_fallback),
    }
}

/// Resolves category selections against a rubric version and scores them.
pub fn score_selections(
    version: Option<&RubricVersion>,
    selections: &CategorySelections,
    policy: ScoringPolicy,
) -> ScoreCard {
    score_ratings(rubric::resolve_all(version, selections), policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Selection};
    use crate::rubric::tests::sample_version;
    use proptest::prelude::*;

    const SUB_SCORES: [SubScore; 3] = [
        SubScore::Pronunciation,
        SubScore::Grammar,
        SubScore::Fluency,
    ];

    fn ratings(pairs: &[(Category, f64)]) -> CategorySelections {
        pairs
            .iter()
            .fold(CategorySelections::new(), |selections, (category, rating)| {
                selections.with(*category, Selection::Rating(*rating))
            })
    }

    #[test]
    fn pronunciation_ignores_unrated_categories() {
        let selections = ratings(&[
            (Category::Consistency, 3.0),
            (Category::Clarity, 3.0),
            (Category::Articulation, 0.0),
            (Category::IntonationAndStress, 0.0),
        ]);
        let card = score_selections(None, &selections, ScoringPolicy::default());
        assert_eq!(round2(card.pronunciation_average), 3.00);
        assert_eq!(card.grammar_average, 0.0);
        assert_eq!(card.epgf_average, 3.0);
    }

    #[test]
    fn fixed_denominator_divides_by_category_count() {
        let selections = ratings(&[(Category::Consistency, 3.0), (Category::Clarity, 3.0)]);
        let policy = ScoringPolicy {
            averaging: AveragingPolicy::FixedDenominator,
            ..ScoringPolicy::default()
        };
        let card = score_selections(None, &selections, policy);
        assert_eq!(card.pronunciation_average, 1.5);
    }

    #[test]
    fn uniform_twos_land_on_proficient_b1() {
        let uniform: Vec<(Category, f64)> = Category::ALL.iter().map(|c| (*c, 2.0)).collect();
        let card = score_selections(None, &ratings(&uniform), ScoringPolicy::default());
        for sub_score in SUB_SCORES {
            assert_eq!(card.sub_score(sub_score), 2.0);
        }
        assert_eq!(card.epgf_average, 2.0);
        assert_eq!(card.proficiency_level(), "Proficient");
        assert_eq!(card.cefr.to_string(), "B1 - Intermediate");
    }

    #[test]
    fn empty_row_scores_beginning() {
        let card = score_selections(None, &CategorySelections::new(), ScoringPolicy::default());
        assert_eq!(card.epgf_average, 0.0);
        assert_eq!(card.tier, ProficiencyTier::Beginning);
        assert_eq!(card.cefr.to_string(), "A1 - Beginner");
    }

    #[test]
    fn composite_skips_empty_sub_scores() {
        assert_eq!(composite(3.0, 0.0, 2.0), 2.5);
        assert_eq!(composite(0.0, 0.0, 0.0), 0.0);
        assert_eq!(composite(1.0, 2.0, 3.0), 2.0);
    }

    #[test]
    fn option_ids_score_through_the_rubric() {
        let version = sample_version("v3");
        // Consistency=4, clarity=2, accuracy=3, quality-of-response=1.
        let selections = CategorySelections::new()
            .with(Category::Consistency, Selection::Option(4))
            .with(Category::Clarity, Selection::Option(12))
            .with(Category::Accuracy, Selection::Option(43))
            .with(Category::QualityOfResponse, Selection::Option(71));
        let card = score_selections(Some(&version), &selections, ScoringPolicy::default());
        assert_eq!(card.pronunciation_average, 3.0);
        assert_eq!(card.grammar_average, 3.0);
        assert_eq!(card.fluency_average, 1.0);
        assert!((card.epgf_average - 7.0 / 3.0).abs() < 1e-9);
        assert_eq!(card.display_epgf(), 2.33);
        assert_eq!(card.proficiency_level(), "Advanced");
    }

    fn uniform(rating: f64) -> CategorySelections {
        let pairs: Vec<(Category, f64)> = Category::ALL.iter().map(|c| (*c, rating)).collect();
        ratings(&pairs)
    }

    #[test]
    fn labels_use_the_unrounded_composite() {
        let card = score_selections(None, &uniform(0.754), ScoringPolicy::default());
        assert_eq!(card.display_epgf(), 0.75);
        assert_eq!(card.tier, ProficiencyTier::Emerging);

        let policy = ScoringPolicy {
            cefr_fallback: CefrFallback::Unknown,
            ..ScoringPolicy::default()
        };
        let card = score_selections(None, &uniform(0.996), policy);
        assert_eq!(card.display_epgf(), 1.0);
        assert_eq!(card.cefr.to_string(), "? - ?");
    }

    fn rating_strategy() -> impl Strategy<Value = f64> {
        prop_oneof![Just(0.0), 0.0f64..=4.0]
    }

    proptest! {
        #[test]
        fn scores_stay_within_rating_bounds(
            values in proptest::collection::vec(rating_strategy(), 9),
        ) {
            let mut selections = CategorySelections::new();
            for (category, rating) in Category::ALL.iter().zip(values) {
                selections.set(*category, Selection::Rating(rating));
            }
            for averaging in [AveragingPolicy::ZeroExclusive, AveragingPolicy::FixedDenominator] {
                let policy = ScoringPolicy { averaging, ..ScoringPolicy::default() };
                let card = score_selections(None, &selections, policy);
                for sub_score in SUB_SCORES {
                    prop_assert!((0.0..=4.0).contains(&card.sub_score(sub_score)));
                }
                prop_assert!((0.0..=4.0).contains(&card.epgf_average));
                prop_assert_ne!(card.tier, ProficiencyTier::Unknown);
            }
        }

        #[test]
        fn single_rating_per_sub_score_is_that_rating(
            p in 0.01f64..=4.0,
            g in 0.01f64..=4.0,
            f in 0.01f64..=4.0,
            slots in (0usize..4, 0usize..3, 0usize..2),
        ) {
            let selections = ratings(&[
                (SubScore::Pronunciation.categories()[slots.0], p),
                (SubScore::Grammar.categories()[slots.1], g),
                (SubScore::Fluency.categories()[slots.2], f),
            ]);
            let card = score_selections(None, &selections, ScoringPolicy::default());
            prop_assert_eq!(card.pronunciation_average, p);
            prop_assert_eq!(card.grammar_average, g);
            prop_assert_eq!(card.fluency_average, f);
        }
    }
}
