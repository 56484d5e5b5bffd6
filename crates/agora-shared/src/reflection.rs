//! Reflection log types.
//!
//! Every pass records every defect category it evaluated, found or not, so a
//! clean draft still shows that the checks ran.

use serde::{Deserialize, Serialize};

/// Default ceiling on revision passes
pub const DEFAULT_MAX_REVISIONS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectCategory {
    WordBudgetImbalance,
    LoadedLanguage,
    MissingHedge,
    OneSidedOmission,
}

impl DefectCategory {
    pub const ALL: [DefectCategory; 4] = [
        Self::WordBudgetImbalance,
        Self::LoadedLanguage,
        Self::MissingHedge,
        Self::OneSidedOmission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WordBudgetImbalance => "word_budget_imbalance",
            Self::LoadedLanguage => "loaded_language",
            Self::MissingHedge => "missing_hedge",
            Self::OneSidedOmission => "one_sided_omission",
        }
    }
}

impl std::fmt::Display for DefectCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a check result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSource {
    /// Computed from draft structure
    Structural,
    /// Model self-critique
    Critique,
    /// Critique unavailable, category not evaluated by the model
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectCheck {
    pub category: DefectCategory,
    pub found: bool,
    pub source: CheckSource,
    #[serde(default)]
    pub detail: String,
}

impl DefectCheck {
    pub fn clean(category: DefectCategory, source: CheckSource) -> Self {
        Self {
            category,
            found: false,
            source,
            detail: String::new(),
        }
    }

    pub fn found(category: DefectCategory, source: CheckSource, detail: impl Into<String>) -> Self {
        Self {
            category,
            found: true,
            source,
            detail: detail.into(),
        }
    }
}

/// One critique pass over a draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionPass {
    /// 1-based pass number
    pub pass: u8,
    pub checks: Vec<DefectCheck>,
    /// Whether a revision followed this pass
    pub revised: bool,
}

impl ReflectionPass {
    pub fn defects(&self) -> Vec<DefectCategory> {
        self.checks
            .iter()
            .filter(|c| c.found)
            .map(|c| c.category)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.checks.iter().all(|c| !c.found)
    }
}

/// Complete reflector record for one turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionLog {
    pub passes: Vec<ReflectionPass>,
    pub revisions: u8,
    pub max_revisions: u8,
    pub ceiling_reached: bool,
}

impl ReflectionLog {
    pub fn new(max_revisions: u8) -> Self {
        Self {
            max_revisions,
            ..Default::default()
        }
    }

    /// Distinct categories evaluated across all passes
    pub fn evaluated_categories(&self) -> Vec<DefectCategory> {
        let mut out: Vec<DefectCategory> = Vec::new();
        for check in self.passes.iter().flat_map(|p| p.checks.iter()) {
            if check.source != CheckSource::Unavailable && !out.contains(&check.category) {
                out.push(check.category);
            }
        }
        out
    }

    /// Defects still present after the last pass
    pub fn open_defects(&self) -> Vec<DefectCategory> {
        self.passes.last().map(|p| p.defects()).unwrap_or_default()
    }
}
