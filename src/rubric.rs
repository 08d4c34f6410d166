//! Versioned rubric option tables and category rating resolution.
//!
//! A [`RubricCatalog`] is built once per load from the option rows of every
//! rubric version and is read-only afterwards. Options live in one arena per
//! version; lookups go through a `(category, id)` index into that arena.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::models::{Category, CategorySelections, RatingRecord, Selection};

pub const NOT_AVAILABLE: &str = "not available";
pub const MAX_RATING: f64 = 4.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryOption {
    pub id: i64,
    pub category: Category,
    pub rating: f64,
    pub descriptor: String,
}

#[derive(Debug, Clone)]
pub struct RubricVersion {
    pub id: String,
    pub active: bool,
    options: Vec<CategoryOption>,
    index: HashMap<(Category, i64), usize>,
}

impl RubricVersion {
    pub fn new(
        id: impl Into<String>,
        active: bool,
        options: Vec<CategoryOption>,
    ) -> Result<Self, CatalogError> {
        let id = id.into();
        let mut index = HashMap::with_capacity(options.len());

        for (slot, option) in options.iter().enumerate() {
            if !(0.0..=MAX_RATING).contains(&option.rating) {
                return Err(CatalogError::RatingOutOfRange {
                    version: id,
                    category: option.category,
                    id: option.id,
                    rating: option.rating,
                });
            }
            if index.insert((option.category, option.id), slot).is_some() {
                return Err(CatalogError::DuplicateOption {
                    version: id,
                    category: option.category,
                    id: option.id,
                });
            }
        }

        Ok(Self {
            id,
            active,
            options,
            index,
        })
    }

    pub fn option(&self, category: Category, id: i64) -> Option<&CategoryOption> {
        self.index
            .get(&(category, id))
            .map(|slot| &self.options[*slot])
    }

    /// Options for one category in catalog order.
    pub fn options_for(&self, category: Category) -> impl Iterator<Item = &CategoryOption> {
        self.options
            .iter()
            .filter(move |option| option.category == category)
    }

    pub fn option_count(&self) -> usize {
        self.options.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RubricCatalog {
    versions: HashMap<String, RubricVersion>,
}

impl RubricCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, version: RubricVersion) {
        self.versions.insert(version.id.clone(), version);
    }

    pub fn version(&self, id: &str) -> Option<&RubricVersion> {
        self.versions.get(id)
    }

    /// The version flagged active; ties resolve to the highest id.
    pub fn active(&self) -> Option<&RubricVersion> {
        self.versions
            .values()
            .filter(|version| version.active)
            .max_by(|a, b| a.id.cmp(&b.id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRating {
    pub rating: f64,
    pub descriptor: String,
    pub found: bool,
}

impl ResolvedRating {
    fn unavailable() -> Self {
        Self {
            rating: 0.0,
            descriptor: NOT_AVAILABLE.to_string(),
            found: false,
        }
    }
}

/// Resolves one category selection to a numeric rating. Never fails: unset,
/// unknown, or out-of-range selections resolve to 0 with a placeholder
/// descriptor so partially rated rows stay displayable.
pub fn resolve(
    version: Option<&RubricVersion>,
    category: Category,
    selection: Option<Selection>,
) -> ResolvedRating {
    match selection {
        None => ResolvedRating::unavailable(),
        Some(Selection::Rating(rating)) => {
            if rating.is_finite() && (0.0..=MAX_RATING).contains(&rating) {
                let descriptor = version
                    .and_then(|v| {
                        v.options_for(category)
                            .find(|option| option.rating == rating)
                            .map(|option| option.descriptor.clone())
                    })
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string());
                ResolvedRating {
                    rating,
                    descriptor,
                    found: true,
                }
            } else {
                tracing::warn!(%category, rating, "raw rating outside 0.00-4.00, scoring as 0");
                ResolvedRating::unavailable()
            }
        }
        Some(Selection::Option(id)) => match version.and_then(|v| v.option(category, id)) {
            Some(option) => ResolvedRating {
                rating: option.rating,
                descriptor: option.descriptor.clone(),
                found: true,
            },
            None => {
                tracing::warn!(
                    %category,
                    option_id = id,
                    version = version.map(|v| v.id.as_str()).unwrap_or("<none>"),
                    "rubric option not found, scoring as 0"
                );
                ResolvedRating::unavailable()
            }
        },
    }
}

/// Resolves all nine categories of a row.
pub fn resolve_all(
    version: Option<&RubricVersion>,
    selections: &CategorySelections,
) -> Vec<RatingRecord> {
    Category::ALL
        .iter()
        .map(|category| {
            let selection = selections.get(*category);
            let resolved = resolve(version, *category, selection);
            RatingRecord {
                category: *category,
                option_id: match selection {
                    Some(Selection::Option(id)) if resolved.found => Some(id),
                    _ => None,
                },
                rating: resolved.rating,
                descriptor: resolved.descriptor,
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Four-step option ladder for every category, ids `category * 10 + step`.
    pub(crate) fn sample_version(id: &str) -> RubricVersion {
        let mut options = Vec::new();
        for category in Category::ALL {
            for (step, (rating, descriptor)) in [
                (1.0, "Beginning"),
                (2.0, "Developing"),
                (3.0, "Proficient"),
                (4.0, "Native-like"),
            ]
            .into_iter()
            .enumerate()
            {
                options.push(CategoryOption {
                    id: (category.index() as i64) * 10 + step as i64 + 1,
                    category,
                    rating,
                    descriptor: format!("{descriptor} {category}"),
                });
            }
        }
        RubricVersion::new(id, true, options).expect("valid sample rubric")
    }

    #[test]
    fn resolves_option_ids_within_their_category() {
        let version = sample_version("v3");
        let resolved = resolve(Some(&version), Category::Consistency, Some(Selection::Option(3)));
        assert_eq!(resolved.rating, 3.0);
        assert_eq!(resolved.descriptor, "Proficient consistency");
        assert!(resolved.found);

        // Option 3 belongs to consistency, not syntax.
        let wrong = resolve(Some(&version), Category::Syntax, Some(Selection::Option(3)));
        assert_eq!(wrong, ResolvedRating::unavailable());
    }

    #[test]
    fn unset_and_unknown_selections_fail_soft() {
        let version = sample_version("v3");
        assert_eq!(resolve(Some(&version), Category::Clarity, None).rating, 0.0);
        let missing = resolve(Some(&version), Category::Clarity, Some(Selection::Option(999)));
        assert_eq!(missing.rating, 0.0);
        assert_eq!(missing.descriptor, NOT_AVAILABLE);
    }

    #[test]
    fn missing_rubric_version_still_resolves() {
        let by_id = resolve(None, Category::Syntax, Some(Selection::Option(61)));
        assert_eq!(by_id.rating, 0.0);
        assert_eq!(by_id.descriptor, NOT_AVAILABLE);

        let raw = resolve(None, Category::Syntax, Some(Selection::Rating(2.5)));
        assert_eq!(raw.rating, 2.5);
        assert_eq!(raw.descriptor, NOT_AVAILABLE);
    }

    #[test]
    fn raw_ratings_pick_up_matching_descriptor() {
        let version = sample_version("v3");
        let raw = resolve(Some(&version), Category::Accuracy, Some(Selection::Rating(2.0)));
        assert_eq!(raw.descriptor, "Developing accuracy");
        let out_of_range = resolve(
            Some(&version),
            Category::Accuracy,
            Some(Selection::Rating(4.5)),
        );
        assert_eq!(out_of_range.rating, 0.0);
    }

    #[test]
    fn rejects_invalid_option_tables() {
        let bad_rating = RubricVersion::new(
            "v9",
            false,
            vec![CategoryOption {
                id: 1,
                category: Category::Syntax,
                rating: 5.0,
                descriptor: "off the scale".to_string(),
            }],
        );
        assert!(matches!(bad_rating, Err(CatalogError::RatingOutOfRange { .. })));

        let option = CategoryOption {
            id: 1,
            category: Category::Syntax,
            rating: 1.0,
            descriptor: "dup".to_string(),
        };
        let duplicate = RubricVersion::new("v9", false, vec![option.clone(), option]);
        assert!(matches!(duplicate, Err(CatalogError::DuplicateOption { .. })));
    }

    #[test]
    fn catalog_prefers_latest_active_version() {
        let mut catalog = RubricCatalog::new();
        catalog.insert(sample_version("v2"));
        catalog.insert(sample_version("v3"));
        let mut retired = sample_version("v1");
        retired.active = false;
        catalog.insert(retired);

        assert_eq!(catalog.active().map(|v| v.id.as_str()), Some("v3"));
        assert!(catalog.version("v1").is_some());
        assert!(catalog.version("v4").is_none());
    }

    #[test]
    fn resolve_all_keeps_category_order_and_drops_unknown_ids() {
        let version = sample_version("v3");
        let selections = CategorySelections::new()
            .with(Category::Consistency, Selection::Option(4))
            .with(Category::Syntax, Selection::Option(500));
        let records = resolve_all(Some(&version), &selections);
        assert_eq!(records.len(), 9);
        assert_eq!(records[0].option_id, Some(4));
        assert_eq!(records[0].rating, 4.0);
        assert_eq!(records[Category::Syntax.index()].option_id, None);
        assert_eq!(records[Category::Syntax.index()].rating, 0.0);
    }
}
