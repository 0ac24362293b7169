//! Offense calculator for the combat-stats page: nine numeric fields in,
//! attack power, defense power and time-to-kill out.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::dom::{Document, NodeId};

pub mod bind;

pub const INPUT_WRAPPER_CLASS: &str = "mb-input-wrapper";
pub const MATH_VIEW_CLASSES: [&str; 2] = ["mb-view-wrapper", "mb-view-type-math"];

/// Growth factor applied per point of accuracy and armor class.
const LEVEL_GROWTH: f64 = 1.07;

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").expect("number pattern is valid")
});

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OffenseInputs {
    pub accuracy: f64,
    pub damage: f64,
    pub crit_damage: f64,
    pub attack_speed: f64,
    pub armor_class: f64,
    pub hit_points: f64,
    pub crit_rate: f64,
    pub strength: f64,
    pub strength_multiplier: f64,
}

impl OffenseInputs {
    /// Fields in page order: accuracy, damage, crit damage, attack speed,
    /// armor class, hit points, crit rate, strength, strength multiplier.
    /// Missing or unparsable fields count as zero.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Self {
        let field = |index: usize| {
            fields
                .get(index)
                .map(|raw| parse_number_prefix(raw.as_ref()))
                .unwrap_or(0.0)
        };
        Self {
            accuracy: field(0),
            damage: field(1),
            crit_damage: field(2),
            attack_speed: field(3),
            armor_class: field(4),
            hit_points: field(5),
            crit_rate: field(6),
            strength: field(7),
            strength_multiplier: field(8),
        }
    }

    pub fn compute(&self) -> OffenseReport {
        let attack_power = round_to(
            LEVEL_GROWTH.powf(self.accuracy)
                * (self.damage + self.strength * self.strength_multiplier)
                * self.attack_speed
                + (self.crit_rate * self.crit_damage * self.attack_speed) * 10.0,
            10.0,
        );
        let defense_power = round_to(self.hit_points * LEVEL_GROWTH.powf(self.armor_class), 10.0);
        let time_to_kill = (attack_power != 0.0).then(|| round_to(defense_power / attack_power, 100.0));

        OffenseReport {
            attack_power,
            defense_power,
            time_to_kill,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffenseReport {
    pub attack_power: f64,
    pub defense_power: f64,
    /// `None` when attack power is zero.
    pub time_to_kill: Option<f64>,
}

impl OffenseReport {
    pub fn time_to_kill_label(&self) -> String {
        match self.time_to_kill {
            Some(ttk) => ttk.to_string(),
            None => "n/a".to_owned(),
        }
    }
}

impl fmt::Display for OffenseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attack power {}, defense power {}, time to kill {}",
            self.attack_power,
            self.defense_power,
            self.time_to_kill_label()
        )
    }
}

/// Reads the calculator inputs from the page and writes the three results
/// into its math views. Returns `None` when the page has fewer than three
/// views.
pub fn apply_to_document(document: &mut Document) -> Option<OffenseReport> {
    let root = document.root();
    let inputs: Vec<String> = document
        .select(root, |element| element.name() == "input")
        .into_iter()
        .filter(|input| {
            document
                .closest(*input, |element| element.has_class(INPUT_WRAPPER_CLASS))
                .is_some()
        })
        .map(|input| document.attr(input, "value").unwrap_or_default().to_owned())
        .collect();
    let views: Vec<NodeId> = document.select(root, |element| {
        MATH_VIEW_CLASSES.iter().all(|class| element.has_class(class))
    });
    if views.len() < 3 {
        debug!(views = views.len(), "calculator outputs missing");
        return None;
    }

    let report = OffenseInputs::from_fields(&inputs).compute();
    document.set_text_content(views[0], report.attack_power.to_string());
    document.set_text_content(views[1], report.defense_power.to_string());
    document.set_text_content(views[2], report.time_to_kill_label());
    Some(report)
}

/// Leading numeric prefix of `raw`, or zero.
fn parse_number_prefix(raw: &str) -> f64 {
    LEADING_NUMBER
        .find(raw.trim_start())
        .and_then(|found| found.as_str().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// Rounds to `1 / scale`, halves toward positive infinity.
fn round_to(value: f64, scale: f64) -> f64 {
    (value * scale + 0.5).floor() / scale
}
