//! Autotune settings.
//!
//! The live settings are a projection of the event log: a baseline seeds
//! the projector and every `autotune.config_updated` event replaces it.
//! Nothing here is process-global; callers pass the struct explicitly.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whether proposals are actionable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutotuneMode {
    /// Proposals are generated but every governance call is refused.
    #[default]
    Shadow,
    /// Full lifecycle enabled.
    Assist,
}

impl AutotuneMode {
    /// Lowercase label.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Shadow => "shadow",
            Self::Assist => "assist",
        }
    }

    /// Parses a lowercase label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for unknown labels.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shadow" => Ok(Self::Shadow),
            "assist" => Ok(Self::Assist),
            other => Err(Error::invalid_config(format!(
                "mode must be one of: shadow, assist (got {other})"
            ))),
        }
    }
}

impl std::fmt::Display for AutotuneMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// When a proposal scan fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerConfig {
    /// Window of recent events to aggregate.
    pub lookback_days: u32,
    /// Minimum signal events in the window before any target is considered.
    pub min_event_count: u32,
    /// Minimum hours between proposals for the same target.
    pub cooldown_hours: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            min_event_count: 5,
            cooldown_hours: 24,
        }
    }
}

/// Upper bounds on automated changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Guardrails {
    /// Largest change to an integer threshold.
    pub max_int_step: i64,
    /// Largest change to a float threshold.
    pub max_float_step: f64,
    /// Minimum candidate confidence.
    pub min_confidence: f64,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            max_int_step: 1,
            max_float_step: 0.05,
            min_confidence: 0.55,
        }
    }
}

/// Scheduler settings for settling applied proposals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoEvaluateConfig {
    /// Whether the scheduler evaluates anything.
    pub enabled: bool,
    /// Minimum hours between apply and evaluation.
    pub horizon_hours: u32,
    /// Applied proposals older than this are left alone.
    pub lookback_days: u32,
    /// Batch cap per tick.
    pub max_targets_per_cycle: u32,
}

impl Default for AutoEvaluateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon_hours: 48,
            lookback_days: 90,
            max_targets_per_cycle: 3,
        }
    }
}

/// Complete autotune settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutotuneConfig {
    /// Master switch for scans and scheduled evaluation.
    pub enabled: bool,
    /// Shadow or assist.
    pub mode: AutotuneMode,
    /// Whether an LLM-backed candidate generator may be used.
    pub llm_enabled: bool,
    /// Scan triggers.
    pub trigger: TriggerConfig,
    /// Change bounds.
    pub guardrails: Guardrails,
    /// Scheduler settings.
    pub auto_evaluate: AutoEvaluateConfig,
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AutotuneMode::Shadow,
            llm_enabled: true,
            trigger: TriggerConfig::default(),
            guardrails: Guardrails::default(),
            auto_evaluate: AutoEvaluateConfig::default(),
        }
    }
}

impl AutotuneConfig {
    /// Checks every bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let g = &self.guardrails;
        if g.max_int_step < 0 {
            return Err(Error::invalid_config("guardrails.max_int_step must be >= 0"));
        }
        if !g.max_float_step.is_finite() || g.max_float_step < 0.0 {
            return Err(Error::invalid_config(
                "guardrails.max_float_step must be a finite number >= 0",
            ));
        }
        if !(0.0..=1.0).contains(&g.min_confidence) {
            return Err(Error::invalid_config(
                "guardrails.min_confidence must be within [0, 1]",
            ));
        }
        if self.trigger.lookback_days == 0 {
            return Err(Error::invalid_config("trigger.lookback_days must be >= 1"));
        }
        let a = &self.auto_evaluate;
        if a.horizon_hours == 0 {
            return Err(Error::invalid_config("auto_evaluate.horizon_hours must be >= 1"));
        }
        if a.lookback_days == 0 {
            return Err(Error::invalid_config("auto_evaluate.lookback_days must be >= 1"));
        }
        if a.max_targets_per_cycle == 0 {
            return Err(Error::invalid_config(
                "auto_evaluate.max_targets_per_cycle must be >= 1",
            ));
        }
        Ok(())
    }

    /// Returns a copy with the patch applied.
    #[must_use]
    pub fn merged(&self, patch: &AutotuneConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(v) = patch.enabled {
            next.enabled = v;
        }
        if let Some(v) = patch.mode {
            next.mode = v;
        }
        if let Some(v) = patch.llm_enabled {
            next.llm_enabled = v;
        }
        if let Some(t) = &patch.trigger {
            set(&mut next.trigger.lookback_days, t.lookback_days);
            set(&mut next.trigger.min_event_count, t.min_event_count);
            set(&mut next.trigger.cooldown_hours, t.cooldown_hours);
        }
        if let Some(g) = &patch.guardrails {
            set(&mut next.guardrails.max_int_step, g.max_int_step);
            set(&mut next.guardrails.max_float_step, g.max_float_step);
            set(&mut next.guardrails.min_confidence, g.min_confidence);
        }
        if let Some(a) = &patch.auto_evaluate {
            set(&mut next.auto_evaluate.enabled, a.enabled);
            set(&mut next.auto_evaluate.horizon_hours, a.horizon_hours);
            set(&mut next.auto_evaluate.lookback_days, a.lookback_days);
            set(
                &mut next.auto_evaluate.max_targets_per_cycle,
                a.max_targets_per_cycle,
            );
        }
        next
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Partial update accepted by `PUT /guardian/autotune/config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AutotuneConfigPatch {
    /// Master switch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AutotuneMode>,
    /// LLM switch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_enabled: Option<bool>,
    /// Trigger fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerPatch>,
    /// Guardrail fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardrails: Option<GuardrailsPatch>,
    /// Scheduler fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_evaluate: Option<AutoEvaluatePatch>,
}

/// Partial [`TriggerConfig`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[allow(missing_docs)]
pub struct TriggerPatch {
    pub lookback_days: Option<u32>,
    pub min_event_count: Option<u32>,
    pub cooldown_hours: Option<u32>,
}

/// Partial [`Guardrails`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[allow(missing_docs)]
pub struct GuardrailsPatch {
    pub max_int_step: Option<i64>,
    pub max_float_step: Option<f64>,
    pub min_confidence: Option<f64>,
}

/// Partial [`AutoEvaluateConfig`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[allow(missing_docs)]
pub struct AutoEvaluatePatch {
    pub enabled: Option<bool>,
    pub horizon_hours: Option<u32>,
    pub lookback_days: Option<u32>,
    pub max_targets_per_cycle: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AutotuneConfig::default();
        assert!(!c.enabled);
        assert_eq!(c.mode, AutotuneMode::Shadow);
        assert!(c.llm_enabled);
        assert_eq!(c.trigger.cooldown_hours, 24);
        assert_eq!(c.guardrails.max_int_step, 1);
        assert!((c.guardrails.max_float_step - 0.05).abs() < f64::EPSILON);
        assert_eq!(c.auto_evaluate.horizon_hours, 48);
        assert_eq!(c.auto_evaluate.max_targets_per_cycle, 3);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() -> serde_json::Result<()> {
        let c: AutotuneConfig =
            serde_json::from_str(r#"{"mode":"assist","trigger":{"min_event_count":12}}"#)?;
        assert_eq!(c.mode, AutotuneMode::Assist);
        assert_eq!(c.trigger.min_event_count, 12);
        assert_eq!(c.trigger.lookback_days, 7);
        Ok(())
    }

    #[test]
    fn patch_only_touches_named_fields() {
        let base = AutotuneConfig::default();
        let patch = AutotuneConfigPatch {
            enabled: Some(true),
            auto_evaluate: Some(AutoEvaluatePatch {
                lookback_days: Some(120),
                ..AutoEvaluatePatch::default()
            }),
            ..AutotuneConfigPatch::default()
        };
        let merged = base.merged(&patch);
        assert!(merged.enabled);
        assert_eq!(merged.auto_evaluate.lookback_days, 120);
        assert_eq!(merged.auto_evaluate.horizon_hours, 48);
        assert_eq!(merged.mode, base.mode);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut c = AutotuneConfig::default();
        c.guardrails.min_confidence = 1.5;
        assert!(matches!(c.validate(), Err(Error::InvalidConfig { .. })));

        let mut c = AutotuneConfig::default();
        c.guardrails.max_float_step = f64::NAN;
        assert!(c.validate().is_err());

        let mut c = AutotuneConfig::default();
        c.auto_evaluate.max_targets_per_cycle = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn mode_parse_accepts_labels() {
        assert_eq!(AutotuneMode::parse(" Assist ").ok(), Some(AutotuneMode::Assist));
        assert!(AutotuneMode::parse("auto").is_err());
    }
}
