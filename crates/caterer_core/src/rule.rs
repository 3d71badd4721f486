//! Rulestring classification.
//!
//! Decides which engine algorithm runs a rule and how many states it has,
//! without consulting rule storage. Anything unrecognized is assumed to be
//! an uploaded rule table.

use serde::{Deserialize, Serialize};

/// Rule used when a request and its history name none.
pub const DEFAULT_RULE: &str = "B3/S23";

/// Engine algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    QuickLife,
    HashLife,
    Generations,
    LargerThanLife,
    RuleLoader,
}

impl Algorithm {
    /// Name passed to the engine's `-a` flag.
    pub fn engine_name(&self) -> &'static str {
        match self {
            Self::QuickLife => "QuickLife",
            Self::HashLife => "HashLife",
            Self::Generations => "Generations",
            Self::LargerThanLife => "Larger than Life",
            Self::RuleLoader => "RuleLoader",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.engine_name())
    }
}

/// What a rulestring turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Two-state B/S or Wolfram rule.
    TwoState,
    /// `B../S../N` with the trailing state count.
    Generations { states: u16 },
    /// `R..,C..,M..,S..,B..,N.`; `C` is the state count.
    LargerThanLife { states: u16 },
    /// Not a rulestring; must come from rule storage.
    Table,
}

impl RuleKind {
    /// Algorithm that runs this kind of rule.
    pub fn algorithm(&self, hashlife: bool) -> Algorithm {
        match self {
            Self::TwoState if hashlife => Algorithm::HashLife,
            Self::TwoState => Algorithm::QuickLife,
            Self::Generations { .. } => Algorithm::Generations,
            Self::LargerThanLife { .. } => Algorithm::LargerThanLife,
            Self::Table => Algorithm::RuleLoader,
        }
    }
}

/// Strip whitespace and fall back to the default rule.
pub fn normalize(rule: &str) -> String {
    let compact: String = rule.split_whitespace().collect();
    if compact.is_empty() {
        DEFAULT_RULE.to_string()
    } else {
        compact
    }
}

/// Classify a (normalized) rulestring.
pub fn classify(rule: &str) -> RuleKind {
    if let Some(states) = larger_than_life_states(rule) {
        return RuleKind::LargerThanLife { states };
    }
    if is_wolfram(rule) {
        return RuleKind::TwoState;
    }
    match birth_survival(rule) {
        Some(None) => RuleKind::TwoState,
        Some(Some(states)) => RuleKind::Generations { states },
        None => RuleKind::Table,
    }
}

/// Whether the text is a rulestring the engine understands natively.
pub fn is_rulestring(text: &str) -> bool {
    !matches!(classify(text), RuleKind::Table)
}

fn all_digits(s: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

/// `R\d{1,3},C(\d{1,3}),M[01],S\d+..\d+,B\d+..\d+,N[NM]`, case-insensitive.
fn larger_than_life_states(rule: &str) -> Option<u16> {
    let upper = rule.to_ascii_uppercase();
    let fields: Vec<&str> = upper.split(',').collect();
    let [r, c, m, s, b, n] = fields.as_slice() else {
        return None;
    };

    let range = |field: &str, prefix: char| {
        field
            .strip_prefix(prefix)
            .and_then(|rest| rest.split_once(".."))
            .map_or(false, |(lo, hi)| all_digits(lo, 1, 9) && all_digits(hi, 1, 9))
    };

    let r_ok = r.strip_prefix('R').map_or(false, |d| all_digits(d, 1, 3));
    let c_digits = c.strip_prefix('C').filter(|d| all_digits(d, 1, 3))?;
    let m_ok = matches!(*m, "M0" | "M1");
    let n_ok = matches!(*n, "NN" | "NM");

    if r_ok && m_ok && n_ok && range(*s, 'S') && range(*b, 'B') {
        c_digits.parse().ok()
    } else {
        None
    }
}

/// `W` followed by exactly three digits.
fn is_wolfram(rule: &str) -> bool {
    let mut chars = rule.chars();
    matches!(chars.next(), Some('W' | 'w')) && all_digits(chars.as_str(), 3, 3)
}

/// Birth/survival rulestrings, optionally with isotropic letters and a
/// trailing `H`/`V` neighborhood suffix.
///
/// Returns `Some(None)` for two-state rules, `Some(Some(n))` for
/// Generations rules with `n` states, `None` otherwise.
fn birth_survival(rule: &str) -> Option<Option<u16>> {
    let body = rule
        .strip_suffix(|c| c == 'H' || c == 'V' || c == 'h' || c == 'v')
        .unwrap_or(rule);
    let body = body.strip_prefix('/').unwrap_or(body);
    let parts: Vec<&str> = body.split('/').collect();

    let condition = |part: &str| {
        let digits = part
            .strip_prefix(|c| matches!(c, 'B' | 'b' | 'S' | 's'))
            .unwrap_or(part);
        // groups of: neighbor count, optional '-', isotropic letters
        let mut chars = digits.chars().peekable();
        while let Some(c) = chars.next() {
            if !('0'..='8').contains(&c) {
                return false;
            }
            if chars.peek() == Some(&'-') {
                chars.next();
            }
            while chars.peek().map_or(false, |l| "cekainyqjrtwz".contains(*l)) {
                chars.next();
            }
        }
        true
    };

    match parts.as_slice() {
        [a, b] if condition(*a) && condition(*b) && !(a.is_empty() && b.is_empty()) => Some(None),
        [a, b, n] if condition(*a) && condition(*b) && all_digits(*n, 1, 3) => {
            n.parse().ok().map(Some)
        }
        _ => None,
    }
}
