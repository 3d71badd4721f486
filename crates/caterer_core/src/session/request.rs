//! Submissions and their validation.
//!
//! Validation happens before anything touches the disk or the engine: a
//! rejected submission leaves no artifacts behind.

use super::annotation::{PatternSource, TimingVerbosity};
use super::SessionLimits;
use crate::color::{parse_rgb, parse_state_colors, ColorError, ColorOptions, ColorTable, RuleFamily};
use crate::pattern::{
    clean_inline, find_recent_pattern, find_recent_rule, make_soup, soup_body, MAX_SOUP_AREA,
};
use crate::pipeline::StagePools;
use crate::rule::{self, Algorithm, RuleKind};
use caterer_rules::{RuleLookup, RuleStoreError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A simulation request as received from the front end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Submission {
    /// Who asked.
    pub requester: String,
    /// Inline run-length pattern.
    pub pattern: Option<String>,
    /// Random soup dimensions instead of a pattern.
    pub soup: Option<(u32, u32)>,
    pub rule: Option<String>,
    /// Generation to simulate up to (1-based).
    pub generation: Option<u64>,
    pub step: Option<u64>,
    /// Use HashLife for two-state rules.
    pub hashlife: bool,
    /// Follow the pattern instead of framing the whole run.
    pub track: bool,
    /// Black-on-white palette.
    pub bw: bool,
    /// Background as `"r,g,b"`.
    pub bg: Option<String>,
    /// Per-state overrides as JSON, `{"1": [255, 0, 0]}`.
    pub colors: Option<String>,
    pub time: TimingVerbosity,
    /// Mention the requester on delivery.
    pub mention: bool,
    /// Label shown above the result.
    pub tag: Option<String>,
    /// Pool list for the two stages, `"compute,blocking"`.
    pub pools: Option<String>,
    /// Recent conversation, newest first.
    pub history: Vec<String>,
}

/// Reasons a submission is rejected.
#[derive(Debug)]
pub enum ValidationError {
    MissingGeneration,
    /// Generation was zero.
    BadGeneration,
    /// Step resolved to zero.
    BadStep,
    TooManyFrames { cap: u64 },
    NoPattern { lookback: usize },
    /// Soup area above the limit.
    SoupTooLarge { max: u64 },
    UnknownRule(String),
    RuleStore(RuleStoreError),
    Colors(ColorError),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingGeneration => write!(f, "Error: No GEN given."),
            Self::BadGeneration => write!(f, "Error: Invalid GEN."),
            Self::BadStep => write!(f, "Error: Invalid STEP."),
            Self::TooManyFrames { cap } => {
                write!(f, "Error: Cannot simulate more than {} frames.", cap)
            }
            Self::NoPattern { lookback } => write!(
                f,
                "Error: No PAT given and none found in last {} messages.",
                lookback
            ),
            Self::SoupTooLarge { max } => {
                write!(f, "Error: Soup cannot have more than {} cells.", max)
            }
            Self::UnknownRule(r) => write!(f, "Error: Rule not found: {}", r),
            Self::RuleStore(e) => write!(f, "Error: {}", e),
            Self::Colors(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RuleStore(e) => Some(e),
            Self::Colors(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RuleStoreError> for ValidationError {
    fn from(e: RuleStoreError) -> Self {
        Self::RuleStore(e)
    }
}

impl From<ColorError> for ValidationError {
    fn from(e: ColorError) -> Self {
        Self::Colors(e)
    }
}

/// A submission that passed validation, ready to run.
#[derive(Debug, Clone)]
pub struct SimRequest {
    pub requester: String,
    /// Normalized rule identifier.
    pub rule: String,
    pub algorithm: Algorithm,
    /// Rule file to hand the engine, for uploaded rules.
    pub rule_file: Option<Vec<u8>>,
    /// Pattern body written to the engine input.
    pub body: String,
    pub source: PatternSource,
    /// Normalized generation target (generation − 1).
    pub generations: u64,
    pub step: u64,
    pub track: bool,
    pub colors: Arc<ColorTable>,
    pub time: TimingVerbosity,
    pub mention: bool,
    pub tag: Option<String>,
    pub pools: StagePools,
}

/// Turn `(generation, step)` into `(target, step)`.
///
/// The target is `generation − 1`; when both are given the smaller number is
/// taken as the step.
pub fn normalize_counts(
    generation: Option<u64>,
    step: Option<u64>,
    frame_cap: u64,
) -> Result<(u64, u64), ValidationError> {
    let generation = generation.ok_or(ValidationError::MissingGeneration)?;
    let target = generation
        .checked_sub(1)
        .ok_or(ValidationError::BadGeneration)?;

    let (target, step) = match step {
        None => (target, 1),
        Some(step) if step > target => (step, target),
        Some(step) => (target, step),
    };
    if step == 0 {
        return Err(ValidationError::BadStep);
    }
    if target > frame_cap.saturating_mul(step) {
        return Err(ValidationError::TooManyFrames { cap: frame_cap });
    }
    Ok((target, step))
}

impl Submission {
    /// Check the submission and resolve everything the session needs.
    pub fn validate<R: Rng + ?Sized>(
        &self,
        rules: &dyn RuleLookup,
        limits: &SessionLimits,
        rng: &mut R,
    ) -> Result<SimRequest, ValidationError> {
        let (generations, step) = normalize_counts(self.generation, self.step, limits.frame_cap)?;
        if let Some((width, height)) = self.soup {
            if u64::from(width) * u64::from(height) > MAX_SOUP_AREA {
                return Err(ValidationError::SoupTooLarge { max: MAX_SOUP_AREA });
            }
        }

        let history = || self.history.iter().map(String::as_str);
        let mut rule = self.rule.clone().filter(|r| !r.trim().is_empty());

        let (body, source) = match (self.soup, &self.pattern) {
            (Some(_), _) => (None, None),
            (None, Some(p)) if !clean_inline(p).is_empty() => {
                (Some(clean_inline(p)), Some(PatternSource::Supplied))
            }
            _ => {
                let found = find_recent_pattern(history(), limits.lookback).ok_or(
                    ValidationError::NoPattern {
                        lookback: limits.lookback,
                    },
                )?;
                if rule.is_none() {
                    rule = found.rule;
                }
                (Some(found.body), Some(PatternSource::Supplied))
            }
        };

        if rule.is_none() {
            rule = find_recent_rule(history(), limits.lookback);
        }
        let rule = rule::normalize(rule.as_deref().unwrap_or(""));

        let (body, source) = match (body, source, self.soup) {
            (Some(body), Some(source), _) => (body, source),
            (_, _, Some((width, height))) => {
                let soup = make_soup(&rule, width, height, rng);
                (
                    soup_body(&soup).to_string(),
                    PatternSource::Soup { width, height },
                )
            }
            _ => {
                return Err(ValidationError::NoPattern {
                    lookback: limits.lookback,
                })
            }
        };

        let kind = rule::classify(&rule);
        let (family, rule_file) = match kind {
            RuleKind::TwoState => (RuleFamily::TwoState, None),
            RuleKind::Generations { states } => (RuleFamily::Generations { states }, None),
            RuleKind::LargerThanLife { states } if states > 2 => {
                (RuleFamily::LargerThanLife { states }, None)
            }
            RuleKind::LargerThanLife { .. } => (RuleFamily::TwoState, None),
            RuleKind::Table => {
                let def = rules
                    .lookup(&rule)?
                    .ok_or_else(|| ValidationError::UnknownRule(rule.clone()))?;
                let stored = parse_state_colors(&def.colors)?;
                (
                    RuleFamily::External {
                        states: def.n_states,
                        stored,
                    },
                    Some(def.file),
                )
            }
        };

        let options = ColorOptions {
            background: self.bg.as_deref().map(parse_rgb).transpose()?,
            black_and_white: self.bw,
            overrides: match &self.colors {
                Some(json) if !json.trim().is_empty() => parse_state_colors(json)?,
                _ => Default::default(),
            },
        };
        let colors = ColorTable::resolve(&family, &options)?;

        Ok(SimRequest {
            requester: self.requester.clone(),
            algorithm: kind.algorithm(self.hashlife),
            rule,
            rule_file,
            body,
            source,
            generations,
            step,
            track: self.track,
            colors: Arc::new(colors),
            time: self.time,
            mention: self.mention,
            tag: self.tag.clone(),
            pools: self
                .pools
                .as_deref()
                .map(StagePools::from_list)
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::GRADIENT_START;
    use caterer_rules::{InMemoryRuleStore, RuleDefinition};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn submission(pattern: &str, generation: u64) -> Submission {
        Submission {
            requester: "alice".into(),
            pattern: Some(pattern.into()),
            generation: Some(generation),
            ..Default::default()
        }
    }

    fn validate(s: &Submission) -> Result<SimRequest, ValidationError> {
        let store = InMemoryRuleStore::new();
        let mut rng = StdRng::seed_from_u64(3);
        s.validate(&store, &SessionLimits::default(), &mut rng)
    }

    #[test]
    fn test_normalize_counts() {
        assert_eq!(normalize_counts(Some(100), None, 2500).unwrap(), (99, 1));
        assert_eq!(normalize_counts(Some(100), Some(4), 2500).unwrap(), (99, 4));
        // the smaller number is the step
        assert_eq!(normalize_counts(Some(5), Some(200), 2500).unwrap(), (200, 4));
        assert!(matches!(
            normalize_counts(None, Some(2), 2500),
            Err(ValidationError::MissingGeneration)
        ));
        assert!(matches!(
            normalize_counts(Some(0), None, 2500),
            Err(ValidationError::BadGeneration)
        ));
        assert!(matches!(
            normalize_counts(Some(1), Some(3), 2500),
            Err(ValidationError::BadStep)
        ));
        assert!(matches!(
            normalize_counts(Some(2502), None, 2500),
            Err(ValidationError::TooManyFrames { cap: 2500 })
        ));
        assert_eq!(normalize_counts(Some(2501), None, 2500).unwrap(), (2500, 1));
    }

    #[test]
    fn test_inline_pattern_defaults() {
        let request = validate(&submission("`3o!`", 10)).unwrap();
        assert_eq!(request.body, "3o!");
        assert_eq!(request.rule, "B3/S23");
        assert_eq!(request.algorithm, Algorithm::QuickLife);
        assert_eq!(request.generations, 9);
        assert_eq!(request.step, 1);
        assert_eq!(request.source, PatternSource::Supplied);
        assert_eq!(request.pools, StagePools::default());
        assert!(request.rule_file.is_none());
    }

    #[test]
    fn test_pattern_and_rule_from_history() {
        let mut s = submission("", 10);
        s.pattern = None;
        s.hashlife = true;
        s.history = vec![
            "nice".into(),
            "x = 3, y = 1, rule = B36/S23\n3o!".into(),
        ];
        let request = validate(&s).unwrap();
        assert_eq!(request.body, "3o!");
        assert_eq!(request.rule, "B36/S23");
        assert_eq!(request.algorithm, Algorithm::HashLife);
    }

    #[test]
    fn test_rule_from_history_when_header_has_none() {
        let mut s = submission("", 10);
        s.pattern = None;
        s.history = vec!["use B2/S/4 please".into(), "x = 1, y = 1\no!".into()];
        let request = validate(&s).unwrap();
        assert_eq!(request.rule, "B2/S/4");
        assert_eq!(request.algorithm, Algorithm::Generations);
        assert_eq!(request.colors.len(), 4);
        assert_eq!(request.colors.get(1), Some(GRADIENT_START));
    }

    #[test]
    fn test_missing_pattern() {
        let mut s = submission("", 10);
        s.history = vec!["hello".into()];
        assert!(matches!(
            validate(&s),
            Err(ValidationError::NoPattern { lookback: 50 })
        ));
    }

    #[test]
    fn test_soup() {
        let mut s = submission("", 10);
        s.soup = Some((8, 4));
        s.rule = Some("B3/S23".into());
        let request = validate(&s).unwrap();
        assert_eq!(request.source, PatternSource::Soup { width: 8, height: 4 });
        assert!(request.body.trim_end().ends_with('!'));
        assert!(!request.body.contains("rule"));
    }

    #[test]
    fn test_soup_area_is_capped() {
        let mut s = submission("", 10);
        s.soup = Some((100_000, 100_000));
        assert!(matches!(
            validate(&s),
            Err(ValidationError::SoupTooLarge { max: MAX_SOUP_AREA })
        ));

        s.soup = Some((1024, 1024));
        assert!(validate(&s).is_ok());
        s.soup = Some((1025, 1024));
        assert!(validate(&s).is_err());
    }

    #[test]
    fn test_uploaded_rule() {
        let store = InMemoryRuleStore::new();
        store.upsert(RuleDefinition {
            name: "Fader".into(),
            file: b"@RULE Fader\n".to_vec(),
            n_states: 3,
            colors: r#"{"0": [1, 2, 3], "2": [0, 0, 255]}"#.into(),
        });
        let mut s = submission("2A!", 10);
        s.rule = Some("Fader".into());
        let mut rng = StdRng::seed_from_u64(1);

        let request = s.validate(&store, &SessionLimits::default(), &mut rng).unwrap();
        assert_eq!(request.algorithm, Algorithm::RuleLoader);
        assert_eq!(request.rule_file.as_deref(), Some(&b"@RULE Fader\n"[..]));
        assert_eq!(request.colors.background(), [1, 2, 3]);
        assert_eq!(request.colors.get(2), Some([0, 0, 255]));

        s.rule = Some("Missing".into());
        assert!(matches!(
            s.validate(&store, &SessionLimits::default(), &mut rng),
            Err(ValidationError::UnknownRule(r)) if r == "Missing"
        ));
    }

    #[test]
    fn test_larger_than_life_states() {
        let mut s = submission("o!", 10);
        s.rule = Some("R2,C5,M1,S2..3,B3..3,NM".into());
        let request = validate(&s).unwrap();
        assert_eq!(request.algorithm, Algorithm::LargerThanLife);
        assert_eq!(request.colors.len(), 5);

        s.rule = Some("R2,C2,M1,S2..3,B3..3,NM".into());
        assert_eq!(validate(&s).unwrap().colors.len(), 2);
    }

    #[test]
    fn test_color_options() {
        let mut s = submission("o!", 10);
        s.bg = Some("1,2,3".into());
        s.colors = Some(r#"{"1": [9, 9, 9]}"#.into());
        s.pools = Some("blocking,blocking".into());
        let request = validate(&s).unwrap();
        assert_eq!(request.colors.background(), [1, 2, 3]);
        assert_eq!(request.colors.get(1), Some([9, 9, 9]));
        assert_eq!(request.pools.render, crate::pipeline::PoolKind::Blocking);

        s.bg = Some("red".into());
        assert!(matches!(validate(&s), Err(ValidationError::Colors(_))));
    }

    #[test]
    fn test_bad_state_count() {
        let store = InMemoryRuleStore::new();
        store.upsert(RuleDefinition {
            name: "Broken".into(),
            file: Vec::new(),
            n_states: 1,
            colors: "{}".into(),
        });
        let mut s = submission("o!", 10);
        s.rule = Some("Broken".into());
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            s.validate(&store, &SessionLimits::default(), &mut rng),
            Err(ValidationError::Colors(ColorError::StateCount(1)))
        ));
    }
}
