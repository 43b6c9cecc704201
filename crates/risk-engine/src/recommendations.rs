//! Rule-driven recommendations
//!
//! A rule fires when its category is present in the composite at or above
//! `min_level`. Output order:
//!
//! 1. priority, High before Medium before Low
//! 2. the category's contribution to the overall score, larger first
//! 3. rule-table order

use crate::aggregator::CompositeAssessment;
use crate::{Category, RiskAssessment, RiskLevel};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CostTier {
    Low,
    Medium,
    High,
}

/// One row of the recommendation table.
///
/// `description` and `impact_template` may contain `{score}`, `{level}` and
/// `{magnitude}` (score / 100 × `impact_scale`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRule {
    pub category: Category,
    pub min_level: RiskLevel,
    /// Display grouping, e.g. "Heat Island Mitigation"
    pub recommendation_category: String,
    pub title: String,
    pub description: String,
    pub impact_template: String,
    pub impact_scale: f64,
    pub priority: Priority,
    pub cost_tier: CostTier,
    pub timeline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub category: String,
    pub risk_category: Category,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub impact_estimate: String,
    pub cost_tier: CostTier,
    pub timeline_estimate: String,
}

impl RecommendationRule {
    fn fires(&self, assessment: &RiskAssessment) -> bool {
        assessment.level >= self.min_level
    }

    fn fill(&self, template: &str, assessment: &RiskAssessment) -> String {
        let magnitude = assessment.score / 100.0 * self.impact_scale;
        template
            .replace("{score}", &format!("{:.1}", assessment.score))
            .replace("{level}", assessment.level.as_str())
            .replace("{magnitude}", &format!("{:.1}", magnitude))
    }

    fn render(&self, assessment: &RiskAssessment) -> Recommendation {
        Recommendation {
            category: self.recommendation_category.clone(),
            risk_category: self.category,
            title: self.title.clone(),
            description: self.fill(&self.description, assessment),
            priority: self.priority,
            impact_estimate: self.fill(&self.impact_template, assessment),
            cost_tier: self.cost_tier,
            timeline_estimate: self.timeline.clone(),
        }
    }
}

/// Produce the ordered recommendation list for a composite.
///
/// An empty list (nothing above Low) is a valid outcome.
pub fn recommend(composite: &CompositeAssessment, rules: &[RecommendationRule]) -> Vec<Recommendation> {
    let mut fired: Vec<(f64, Recommendation)> = rules
        .iter()
        .filter_map(|rule| {
            let assessment = composite.assessment(rule.category)?;
            rule.fires(assessment)
                .then(|| (composite.contribution(rule.category), rule.render(assessment)))
        })
        .collect();

    // Stable sort keeps rule-table order for full ties
    fired.sort_by(|(ca, a), (cb, b)| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| cb.total_cmp(ca))
    });

    debug!(
        "{} of {} recommendation rules fired for {}",
        fired.len(),
        rules.len(),
        composite.target().label()
    );

    fired.into_iter().map(|(_, r)| r).collect()
}

#[allow(clippy::too_many_arguments)]
fn rule(
    category: Category,
    min_level: RiskLevel,
    group: &str,
    title: &str,
    description: &str,
    impact: &str,
    impact_scale: f64,
    priority: Priority,
    cost_tier: CostTier,
    timeline: &str,
) -> RecommendationRule {
    RecommendationRule {
        category,
        min_level,
        recommendation_category: group.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        impact_template: impact.to_string(),
        impact_scale,
        priority,
        cost_tier,
        timeline: timeline.to_string(),
    }
}

pub const HEAT: &str = "Heat Island Mitigation";
pub const AIR: &str = "Air Quality Improvement";
pub const GREEN: &str = "Green Infrastructure";
pub const FLOOD: &str = "Flood Resilience";

/// Built-in rule table
pub fn default_rules() -> Vec<RecommendationRule> {
    use Category::*;
    use RiskLevel::{High, Moderate, Severe};

    vec![
        rule(
            Temperature, Severe, HEAT,
            "Open Cooling Centers",
            "Surface temperatures are at {level} heat risk (score {score}). Designate air-conditioned public buildings as cooling centers during heat events.",
            "Cuts heat-related emergency visits by up to {magnitude}%",
            30.0, Priority::High, CostTier::Medium, "Immediate (0-3 months)",
        ),
        rule(
            Temperature, High, HEAT,
            "Cool Roof Program",
            "Heat risk is {level} (score {score}). Incentivize reflective roofing on commercial and residential buildings.",
            "Lowers local surface temperatures by up to {magnitude}°C",
            4.0, Priority::High, CostTier::Medium, "Short term (6-18 months)",
        ),
        rule(
            Temperature, Moderate, HEAT,
            "Urban Tree Canopy Expansion",
            "Heat risk is {level} (score {score}). Plant street trees along exposed corridors to increase shade.",
            "Reduces peak air temperature by up to {magnitude}°C",
            3.0, Priority::Medium, CostTier::Low, "Medium term (1-3 years)",
        ),
        rule(
            AirQuality, High, AIR,
            "Emission Monitoring Network",
            "Air quality risk is {level} (score {score}). Deploy low-cost NO₂ sensors near traffic and industrial sources.",
            "Targets enforcement at sources behind up to {magnitude}% of exposure",
            60.0, Priority::High, CostTier::Medium, "Short term (3-12 months)",
        ),
        rule(
            AirQuality, Moderate, AIR,
            "Low-Emission Traffic Zones",
            "Air quality risk is {level} (score {score}). Restrict high-emission vehicles in the densest districts.",
            "Reduces roadside NO₂ by up to {magnitude}%",
            25.0, Priority::Medium, CostTier::Medium, "Medium term (1-2 years)",
        ),
        rule(
            Vegetation, High, GREEN,
            "Urban Forest Expansion",
            "Vegetation cover is sparse ({level} risk, score {score}). Convert vacant lots and medians into planted green space.",
            "Raises neighbourhood green coverage by up to {magnitude}%",
            20.0, Priority::High, CostTier::Medium, "Medium term (1-3 years)",
        ),
        rule(
            Vegetation, Moderate, GREEN,
            "Green Corridor Development",
            "Vegetation risk is {level} (score {score}). Link parks with planted corridors along streets and waterways.",
            "Connects up to {magnitude}% more residents to green space",
            15.0, Priority::Medium, CostTier::Low, "Long term (2-5 years)",
        ),
        rule(
            Precipitation, High, FLOOD,
            "Flood Early Warning System",
            "Precipitation risk is {level} (score {score}). Install rain and river gauges linked to public alerts.",
            "Gives residents up to {magnitude} hours of additional warning",
            12.0, Priority::High, CostTier::Medium, "Short term (6-12 months)",
        ),
        rule(
            Precipitation, Moderate, FLOOD,
            "Stormwater Management Upgrade",
            "Precipitation risk is {level} (score {score}). Add permeable paving, bioswales and retention basins.",
            "Absorbs up to {magnitude}% more runoff during peak storms",
            40.0, Priority::Medium, CostTier::High, "Long term (2-5 years)",
        ),
    ]
}
