//! Threshold classification of aggregates into map colors.
//!
//! Every metric is classified by the same data-driven [`ClassificationRule`];
//! the multi-metric "summary" view is a [`CompositeRule`] that scores a set of
//! directional predicates and maps the score onto tiers.

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ChoroplethError, Result};

/// A `#RRGGBB` color with uppercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    /// The stock "no data" grey.
    pub fn no_data() -> Self {
        Color(DEFAULT_NO_DATA.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Color {
    type Err = ChoroplethError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let hex = s.strip_prefix('#').unwrap_or_default();
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChoroplethError::config(format!(
                "invalid color '{}', expected #RRGGBB",
                s
            )));
        }
        Ok(Color(format!("#{}", hex.to_ascii_uppercase())))
    }
}

impl TryFrom<String> for Color {
    type Error = ChoroplethError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The color a district gets when it has no value.
pub const DEFAULT_NO_DATA: &str = "#808080";

#[derive(Debug, Clone, PartialEq)]
pub struct Tier {
    pub threshold: f64,
    pub color: Color,
}

/// Tiers of one metric, highest threshold first, plus the lowest-tier color.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRule {
    tiers: Vec<Tier>,
    default: Color,
}

impl ClassificationRule {
    pub fn new(mut tiers: Vec<Tier>, default: Color) -> Self {
        tiers.sort_by(|a, b| b.threshold.total_cmp(&a.threshold));
        Self { tiers, default }
    }

    /// First tier whose threshold the value strictly exceeds. A value equal
    /// to a threshold falls to the tier below.
    pub fn classify(&self, value: f64) -> &Color {
        self.tiers
            .iter()
            .find(|t| value > t.threshold)
            .map(|t| &t.color)
            .unwrap_or(&self.default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Above,
    Below,
}

/// One point of a composite score: `metric > bound` or `metric < bound`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub metric: String,
    pub comparison: Comparison,
    pub bound: f64,
}

impl Predicate {
    pub fn holds(&self, value: f64) -> bool {
        match self.comparison {
            Comparison::Above => value > self.bound,
            Comparison::Below => value < self.bound,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTier {
    pub min_score: u32,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeRule {
    pub id: String,
    predicates: Vec<Predicate>,
    tiers: Vec<ScoreTier>,
    default: Color,
}

impl CompositeRule {
    pub fn new(id: impl Into<String>, predicates: Vec<Predicate>, mut tiers: Vec<ScoreTier>, default: Color) -> Self {
        tiers.sort_by(|a, b| b.min_score.cmp(&a.min_score));
        Self {
            id: id.into(),
            predicates,
            tiers,
            default,
        }
    }

    /// Distinct metrics the predicates read, in predicate order.
    pub fn required_metrics(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for p in &self.predicates {
            if !out.contains(&p.metric.as_str()) {
                out.push(&p.metric);
            }
        }
        out
    }

    /// `None` when any required metric is missing; no partial scores.
    pub fn score(&self, values: &HashMap<&str, Option<f64>>) -> Option<u32> {
        let mut score = 0;
        for p in &self.predicates {
            let value = (*values.get(p.metric.as_str())?)?;
            if p.holds(value) {
                score += 1;
            }
        }
        Some(score)
    }

    pub fn color_for(&self, score: u32) -> &Color {
        self.tiers
            .iter()
            .find(|t| score >= t.min_score)
            .map(|t| &t.color)
            .unwrap_or(&self.default)
    }
}

/// Result of a composite classification.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeOutcome {
    pub score: Option<u32>,
    pub color: Color,
}

#[derive(Debug, Clone)]
pub struct ClassificationEngine {
    no_data: Color,
    rules: HashMap<String, ClassificationRule>,
    composite: Option<CompositeRule>,
}

impl ClassificationEngine {
    pub fn new(
        no_data: Color,
        rules: HashMap<String, ClassificationRule>,
        composite: Option<CompositeRule>,
    ) -> Result<Self> {
        if let Some(c) = &composite {
            if rules.contains_key(&c.id) {
                return Err(ChoroplethError::config(format!(
                    "composite id '{}' collides with a metric",
                    c.id
                )));
            }
            if let Some(m) = c.required_metrics().into_iter().find(|m| !rules.contains_key(*m)) {
                return Err(ChoroplethError::config(format!(
                    "composite '{}' reads unknown metric '{}'",
                    c.id, m
                )));
            }
        }
        Ok(Self {
            no_data,
            rules,
            composite,
        })
    }

    pub fn no_data(&self) -> &Color {
        &self.no_data
    }

    pub fn is_metric(&self, metric: &str) -> bool {
        self.rules.contains_key(metric)
    }

    pub fn composite(&self) -> Option<&CompositeRule> {
        self.composite.as_ref()
    }

    pub fn is_composite(&self, id: &str) -> bool {
        self.composite.as_ref().map(|c| c.id == id).unwrap_or(false)
    }

    pub fn classify(&self, metric: &str, value: Option<f64>) -> Result<Color> {
        let Some(value) = value else {
            return Ok(self.no_data.clone());
        };
        let rule = self
            .rules
            .get(metric)
            .ok_or_else(|| ChoroplethError::UnknownMetric(metric.to_owned()))?;
        Ok(rule.classify(value).clone())
    }

    pub fn classify_composite(&self, values: &HashMap<&str, Option<f64>>) -> Result<CompositeOutcome> {
        let rule = self
            .composite
            .as_ref()
            .ok_or_else(|| ChoroplethError::UnknownMetric("no composite classification configured".into()))?;
        Ok(match rule.score(values) {
            Some(score) => CompositeOutcome {
                score: Some(score),
                color: rule.color_for(score).clone(),
            },
            None => CompositeOutcome {
                score: None,
                color: self.no_data.clone(),
            },
        })
    }
}
