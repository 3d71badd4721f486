//! Cell-state colors.
//!
//! A `ColorTable` maps every state index of a rule to an RGB triple.
//! State 0 is always the background.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// An RGB triple.
pub type Rgb = [u8; 3];

/// Default background (dark slate).
pub const DEFAULT_BACKGROUND: Rgb = [54, 57, 62];
/// Default live-cell color.
pub const DEFAULT_FOREGROUND: Rgb = [255, 255, 255];
/// Background and foreground for the black-on-white palette.
pub const BW_BACKGROUND: Rgb = [255, 255, 255];
pub const BW_FOREGROUND: Rgb = [0, 0, 0];
/// Gradient anchors for many-state rules: state 1 and the last state.
pub const GRADIENT_START: Rgb = [255, 255, 0];
pub const GRADIENT_END: Rgb = [255, 0, 0];

/// Rule families, as far as coloring is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleFamily {
    /// Plain life-like and Wolfram rules, plus two-state Larger than Life.
    TwoState,
    /// Generations rules: states decay through 2..N-1.
    Generations { states: u16 },
    /// Larger than Life with more than two states.
    LargerThanLife { states: u16 },
    /// Uploaded rule tables with their stored colors.
    External {
        states: u16,
        stored: BTreeMap<u16, Rgb>,
    },
}

impl RuleFamily {
    /// Declared number of states, including state 0.
    pub fn states(&self) -> u16 {
        match self {
            Self::TwoState => 2,
            Self::Generations { states }
            | Self::LargerThanLife { states }
            | Self::External { states, .. } => *states,
        }
    }
}

/// Requester-controlled color choices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorOptions {
    /// Explicit background color.
    pub background: Option<Rgb>,
    /// Use the black-on-white palette.
    pub black_and_white: bool,
    /// Per-state overrides, applied last.
    pub overrides: BTreeMap<u16, Rgb>,
}

/// Errors while building a color table.
#[derive(Debug)]
pub enum ColorError {
    /// The rule's state count is unusable.
    StateCount(u16),
    /// A color could not be read.
    BadColor(String),
    /// A state key in an override or stored table is not an integer.
    BadState(String),
    /// Override or stored table is not valid JSON.
    Json(serde_json::Error),
}

impl std::fmt::Display for ColorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateCount(n) => write!(f, "Cannot color a rule with {} states", n),
            Self::BadColor(c) => write!(f, "Invalid color: {}", c),
            Self::BadState(s) => write!(f, "Invalid state index: {}", s),
            Self::Json(e) => write!(f, "Invalid color table: {}", e),
        }
    }
}

impl std::error::Error for ColorError {}

impl From<serde_json::Error> for ColorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Linear gradient over states 1..n_states (state 0 excluded).
///
/// Returns `n_states - 1` colors, first equal to `start`, last to `end`.
pub fn gradient(n_states: u16, start: Rgb, end: Rgb) -> Vec<Rgb> {
    let count = n_states.saturating_sub(1) as usize;
    let span = count.saturating_sub(1).max(1) as f64;
    (0..count)
        .map(|i| {
            let t = i as f64 / span;
            let mut c = [0u8; 3];
            for ch in 0..3 {
                let a = start[ch] as f64;
                let b = end[ch] as f64;
                c[ch] = (a + (b - a) * t).round() as u8;
            }
            c
        })
        .collect()
}

/// Read `"r,g,b"`.
pub fn parse_rgb(text: &str) -> Result<Rgb, ColorError> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [r, g, b] => match (r.parse(), g.parse(), b.parse()) {
            (Ok(r), Ok(g), Ok(b)) => Ok([r, g, b]),
            _ => Err(ColorError::BadColor(text.to_string())),
        },
        _ => Err(ColorError::BadColor(text.to_string())),
    }
}

/// Read a JSON object of `{"state": [r, g, b]}` pairs.
pub fn parse_state_colors(json: &str) -> Result<BTreeMap<u16, Rgb>, ColorError> {
    let raw: BTreeMap<String, Rgb> = serde_json::from_str(json)?;
    raw.into_iter()
        .map(|(k, v)| {
            k.trim()
                .parse::<u16>()
                .map(|state| (state, v))
                .map_err(|_| ColorError::BadState(k))
        })
        .collect()
}

/// Immutable state-to-color mapping for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTable {
    colors: Vec<Rgb>,
}

impl ColorTable {
    /// Resolve colors for a rule family.
    pub fn resolve(family: &RuleFamily, options: &ColorOptions) -> Result<Self, ColorError> {
        let states = family.states();
        if !(2..=256).contains(&states) {
            return Err(ColorError::StateCount(states));
        }

        let (default_bg, fg) = if options.black_and_white {
            (BW_BACKGROUND, BW_FOREGROUND)
        } else {
            (DEFAULT_BACKGROUND, DEFAULT_FOREGROUND)
        };
        let mut background = options.background.unwrap_or(default_bg);

        let mut colors = match family {
            RuleFamily::TwoState => vec![background, fg],
            RuleFamily::Generations { .. } | RuleFamily::LargerThanLife { .. } => {
                let mut c = vec![background];
                c.extend(gradient(states, GRADIENT_START, GRADIENT_END));
                c
            }
            RuleFamily::External { stored, .. } => {
                if options.background.is_none() {
                    if let Some(bg) = stored.get(&0) {
                        background = *bg;
                    }
                }
                let mut c = vec![background];
                c.extend(gradient(states, GRADIENT_START, GRADIENT_END));
                for (&state, &color) in stored.range(1..states) {
                    c[state as usize] = color;
                }
                c
            }
        };

        for (&state, &color) in &options.overrides {
            if state == 0 && !matches!(family, RuleFamily::TwoState) {
                debug!("Ignoring state 0 override for a multi-state rule");
                continue;
            }
            match colors.get_mut(state as usize) {
                Some(slot) => *slot = color,
                None => debug!("Ignoring override for state {} beyond {} states", state, states),
            }
        }

        Ok(Self { colors })
    }

    /// Color of state 0.
    pub fn background(&self) -> Rgb {
        self.colors[0]
    }

    /// Color of a state, if the rule has it.
    pub fn get(&self, state: u16) -> Option<Rgb> {
        self.colors.get(state as usize).copied()
    }

    /// Number of states covered.
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}
