//! Constraint Registry (C4): declarations of the hard and soft constraints
//! named in spec §4.4. Encoding of each constraint into the CP model lives
//! in [`crate::cp_model`]; this module owns the declarations, their
//! defaults, and resolution against a caller-supplied configuration.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    Hard,
    Soft,
}

#[derive(Debug, Clone)]
pub struct ConstraintDeclaration {
    pub code: &'static str,
    pub name: &'static str,
    pub constraint_type: ConstraintType,
    pub category: &'static str,
    pub default_weight: f64,
    pub default_parameters: HashMap<&'static str, f64>,
}

// Constraint codes. Preserved verbatim -- callers and tests match on these.
pub const UNIFIED_STUDENT_CONFLICT: &str = "UNIFIED_STUDENT_CONFLICT";
pub const ROOM_CAPACITY_HARD: &str = "ROOM_CAPACITY_HARD";
pub const ROOM_SEQUENTIAL_USE: &str = "ROOM_SEQUENTIAL_USE";
pub const PREREQUISITE_ORDER: &str = "PREREQUISITE_ORDER";
pub const LOCK_COMPLIANCE: &str = "LOCK_COMPLIANCE";
pub const MAX_EXAMS_PER_STUDENT_PER_DAY: &str = "MAX_EXAMS_PER_STUDENT_PER_DAY";
pub const MINIMUM_GAP: &str = "MINIMUM_GAP";
pub const INVIGILATOR_LOAD_BALANCE: &str = "INVIGILATOR_LOAD_BALANCE";
pub const INSTRUCTOR_CONFLICT: &str = "INSTRUCTOR_CONFLICT";
pub const CARRYOVER_STUDENT_CONFLICT: &str = "CARRYOVER_STUDENT_CONFLICT";
pub const PREFERENCE_SLOTS: &str = "PREFERENCE_SLOTS";
pub const DAILY_WORKLOAD_BALANCE: &str = "DAILY_WORKLOAD_BALANCE";
pub const OVERBOOKING_PENALTY: &str = "OVERBOOKING_PENALTY";
pub const ROOM_DURATION_HOMOGENEITY: &str = "ROOM_DURATION_HOMOGENEITY";
pub const ROOM_FIT_PENALTY: &str = "ROOM_FIT_PENALTY";

/// The constraints a caller activates for a solve, resolved against the
/// registry's defaults (spec §6's `constraints` payload key).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintsConfig {
    #[serde(default)]
    pub rules: Vec<ConstraintRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintRule {
    pub code: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub weight: Option<f64>,
    /// Overrides the declared hard/soft type. Undocumented in the wire
    /// payload of spec §6 but required to express scenario S2 (spec §8),
    /// which marks a normally-hard constraint soft for a single solve.
    #[serde(default)]
    pub constraint_type: Option<ConstraintType>,
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct ActiveConstraint {
    pub code: &'static str,
    pub constraint_type: ConstraintType,
    pub weight: f64,
    pub parameters: HashMap<String, f64>,
}

pub struct ConstraintRegistry {
    declarations: HashMap<&'static str, ConstraintDeclaration>,
}

impl ConstraintRegistry {
    pub fn with_core_declarations() -> Self {
        let mut declarations = HashMap::new();
        let mut add = |decl: ConstraintDeclaration| {
            declarations.insert(decl.code, decl);
        };

        add(ConstraintDeclaration {
            code: UNIFIED_STUDENT_CONFLICT,
            name: "Unified student conflict",
            constraint_type: ConstraintType::Hard,
            category: "student",
            default_weight: 1.0,
            default_parameters: HashMap::new(),
        });
        add(ConstraintDeclaration {
            code: ROOM_CAPACITY_HARD,
            name: "Room capacity (hard)",
            constraint_type: ConstraintType::Hard,
            category: "room",
            default_weight: 1.0,
            default_parameters: HashMap::new(),
        });
        add(ConstraintDeclaration {
            code: ROOM_SEQUENTIAL_USE,
            name: "Room sequential use",
            constraint_type: ConstraintType::Hard,
            category: "room",
            default_weight: 1.0,
            default_parameters: HashMap::from([("allow_zero_gap_handover", 0.0)]),
        });
        add(ConstraintDeclaration {
            code: PREREQUISITE_ORDER,
            name: "Prerequisite order",
            constraint_type: ConstraintType::Hard,
            category: "ordering",
            default_weight: 1.0,
            default_parameters: HashMap::new(),
        });
        add(ConstraintDeclaration {
            code: LOCK_COMPLIANCE,
            name: "Lock compliance",
            constraint_type: ConstraintType::Hard,
            category: "lock",
            default_weight: 1.0,
            default_parameters: HashMap::new(),
        });
        add(ConstraintDeclaration {
            code: MAX_EXAMS_PER_STUDENT_PER_DAY,
            name: "Max exams per student per day",
            constraint_type: ConstraintType::Soft,
            category: "student",
            default_weight: 100.0,
            default_parameters: HashMap::from([("max_exams_per_day", 2.0)]),
        });
        add(ConstraintDeclaration {
            code: MINIMUM_GAP,
            name: "Minimum gap",
            constraint_type: ConstraintType::Soft,
            category: "student",
            default_weight: 50.0,
            default_parameters: HashMap::from([("min_gap_slots", 1.0)]),
        });
        add(ConstraintDeclaration {
            code: INVIGILATOR_LOAD_BALANCE,
            name: "Invigilator load balance",
            constraint_type: ConstraintType::Soft,
            category: "invigilator",
            default_weight: 10.0,
            default_parameters: HashMap::new(),
        });
        add(ConstraintDeclaration {
            code: INSTRUCTOR_CONFLICT,
            name: "Instructor conflict",
            constraint_type: ConstraintType::Soft,
            category: "invigilator",
            default_weight: 75.0,
            default_parameters: HashMap::new(),
        });
        add(ConstraintDeclaration {
            code: CARRYOVER_STUDENT_CONFLICT,
            name: "Carryover student conflict",
            constraint_type: ConstraintType::Soft,
            category: "student",
            default_weight: 150.0,
            default_parameters: HashMap::from([("max_allowed_conflicts", 3.0)]),
        });
        add(ConstraintDeclaration {
            code: PREFERENCE_SLOTS,
            name: "Preference slots",
            constraint_type: ConstraintType::Soft,
            category: "preference",
            default_weight: 5.0,
            default_parameters: HashMap::new(),
        });
        add(ConstraintDeclaration {
            code: DAILY_WORKLOAD_BALANCE,
            name: "Daily workload balance",
            constraint_type: ConstraintType::Soft,
            category: "preference",
            default_weight: 10.0,
            default_parameters: HashMap::new(),
        });
        add(ConstraintDeclaration {
            code: OVERBOOKING_PENALTY,
            name: "Overbooking penalty",
            constraint_type: ConstraintType::Soft,
            category: "room",
            default_weight: 20.0,
            default_parameters: HashMap::new(),
        });
        add(ConstraintDeclaration {
            code: ROOM_DURATION_HOMOGENEITY,
            name: "Room duration homogeneity",
            constraint_type: ConstraintType::Soft,
            category: "room",
            default_weight: 5.0,
            default_parameters: HashMap::new(),
        });
        add(ConstraintDeclaration {
            code: ROOM_FIT_PENALTY,
            name: "Room fit penalty",
            constraint_type: ConstraintType::Soft,
            category: "room",
            default_weight: 1.0,
            default_parameters: HashMap::new(),
        });

        ConstraintRegistry { declarations }
    }

    pub fn declaration(&self, code: &str) -> Option<&ConstraintDeclaration> {
        self.declarations.get(code)
    }

    pub fn get_active_constraint_classes<'a>(
        &'a self,
        active: &'a [ActiveConstraint],
    ) -> impl Iterator<Item = &'a ConstraintDeclaration> + 'a {
        active
            .iter()
            .filter_map(move |a| self.declarations.get(a.code))
    }

    /// Resolves a caller's [`ConstraintsConfig`] against the registry's
    /// declared defaults. Unknown codes are logged and ignored; missing
    /// weights/parameters fall back to the declaration's defaults (spec §6).
    pub fn resolve(&self, config: &ConstraintsConfig) -> Vec<ActiveConstraint> {
        let mut active = Vec::new();
        for rule in &config.rules {
            let Some(decl) = self.declarations.get(rule.code.as_str()) else {
                warn!("unknown constraint code '{}' ignored", rule.code);
                continue;
            };
            if !rule.enabled {
                continue;
            }
            let mut parameters: HashMap<String, f64> = decl
                .default_parameters
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect();
            for (k, v) in &rule.parameters {
                parameters.insert(k.clone(), *v);
            }
            active.push(ActiveConstraint {
                code: decl.code,
                constraint_type: rule.constraint_type.unwrap_or(decl.constraint_type),
                weight: rule.weight.unwrap_or(decl.default_weight),
                parameters,
            });
        }
        active
    }

    /// All declarations active by default (every declared constraint,
    /// enabled, at its default weight) -- used when a caller supplies no
    /// configuration at all.
    pub fn resolve_defaults(&self) -> Vec<ActiveConstraint> {
        self.declarations
            .values()
            .map(|decl| ActiveConstraint {
                code: decl.code,
                constraint_type: decl.constraint_type,
                weight: decl.default_weight,
                parameters: decl
                    .default_parameters
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_are_ignored_not_fatal() {
        let registry = ConstraintRegistry::with_core_declarations();
        let config = ConstraintsConfig {
            rules: vec![ConstraintRule {
                code: "NOT_A_REAL_CODE".into(),
                enabled: true,
                weight: None,
                constraint_type: None,
                parameters: HashMap::new(),
            }],
        };
        assert!(registry.resolve(&config).is_empty());
    }

    #[test]
    fn missing_weight_falls_back_to_default() {
        let registry = ConstraintRegistry::with_core_declarations();
        let config = ConstraintsConfig {
            rules: vec![ConstraintRule {
                code: MINIMUM_GAP.into(),
                enabled: true,
                weight: None,
                constraint_type: None,
                parameters: HashMap::new(),
            }],
        };
        let active = registry.resolve(&config);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].weight, 50.0);
        assert_eq!(active[0].parameters.get("min_gap_slots"), Some(&1.0));
    }

    #[test]
    fn type_override_supports_soft_student_conflict_scenario() {
        let registry = ConstraintRegistry::with_core_declarations();
        let config = ConstraintsConfig {
            rules: vec![ConstraintRule {
                code: UNIFIED_STUDENT_CONFLICT.into(),
                enabled: true,
                weight: None,
                constraint_type: Some(ConstraintType::Soft),
                parameters: HashMap::new(),
            }],
        };
        let active = registry.resolve(&config);
        assert_eq!(active[0].constraint_type, ConstraintType::Soft);
    }
}
