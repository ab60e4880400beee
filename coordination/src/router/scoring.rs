//! Rule-based scoring
//!
//! Deterministic 0-100 score from complexity, file count, criterion count
//! and a tag weight table. The score maps onto a [`ModelTier`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::prd::{Complexity, Task};
use crate::registry::ModelTier;

/// One line of a score breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreContribution {
    pub source: String,
    pub delta: i32,
}

/// Result of scoring a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleScore {
    /// Clamped to 0..=100
    pub score: u8,
    pub tier: ModelTier,
    pub breakdown: Vec<ScoreContribution>,
}

/// Scoring rules with a configurable tag table
#[derive(Debug, Clone)]
pub struct ScoringRules {
    tag_weights: HashMap<String, i32>,
}

impl ScoringRules {
    pub fn new() -> Self {
        let tag_weights = [
            ("architecture", 20),
            ("security", 15),
            ("concurrency", 12),
            ("performance", 10),
            ("migration", 10),
            ("refactor", 8),
            ("database", 5),
            ("api", 5),
            ("testing", -5),
            ("config", -5),
            ("docs", -10),
            ("documentation", -10),
            ("formatting", -15),
            ("lint", -15),
            ("typo", -25),
        ]
        .into_iter()
        .map(|(tag, weight)| (tag.to_string(), weight))
        .collect();
        Self { tag_weights }
    }

    /// Override or add tag weights
    pub fn with_tag_weights<I>(mut self, weights: I) -> Self
    where
        I: IntoIterator<Item = (String, i32)>,
    {
        for (tag, weight) in weights {
            self.tag_weights.insert(tag.to_lowercase(), weight);
        }
        self
    }

    pub fn base_score(complexity: Complexity) -> i32 {
        match complexity {
            Complexity::Trivial => 10,
            Complexity::Simple => 25,
            Complexity::Moderate => 50,
            Complexity::Complex => 75,
            Complexity::Epic => 95,
        }
    }

    pub fn tag_weight(&self, tag: &str) -> i32 {
        self.tag_weights
            .get(&tag.trim().to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn score(&self, task: &Task) -> RuleScore {
        self.score_parts(
            task.complexity,
            &task.tags,
            task.file_count(),
            task.acceptance_criteria.len(),
        )
    }

    pub fn score_parts<S: AsRef<str>>(
        &self,
        complexity: Complexity,
        tags: &[S],
        file_count: usize,
        criteria_count: usize,
    ) -> RuleScore {
        let mut breakdown = vec![ScoreContribution {
            source: format!("complexity:{}", complexity),
            delta: Self::base_score(complexity),
        }];

        if file_count > 2 {
            breakdown.push(ScoreContribution {
                source: format!("files:{}", file_count),
                delta: 5 * (file_count as i32 - 2),
            });
        }
        if criteria_count > 2 {
            breakdown.push(ScoreContribution {
                source: format!("criteria:{}", criteria_count),
                delta: 3 * (criteria_count as i32 - 2),
            });
        }

        let mut seen: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim().to_lowercase();
            if seen.contains(&tag) {
                continue;
            }
            let weight = self.tag_weight(&tag);
            if weight != 0 {
                breakdown.push(ScoreContribution {
                    source: format!("tag:{}", tag),
                    delta: weight,
                });
            }
            seen.push(tag);
        }

        let raw: i32 = breakdown.iter().map(|c| c.delta).sum();
        let score = raw.clamp(0, 100) as u8;
        RuleScore {
            score,
            tier: ModelTier::for_score(score),
            breakdown,
        }
    }
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self::new()
    }
}
