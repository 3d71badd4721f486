//! Rule definitions and `.rule` file metadata extraction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stored rule: raw file plus the metadata needed to render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Rule name as declared by `@RULE`.
    pub name: String,
    /// Raw `.rule` file contents, written back to disk for the engine.
    #[serde(skip)]
    pub file: Vec<u8>,
    /// Declared number of cell states (including state 0).
    pub n_states: u16,
    /// Serialized color table: JSON object mapping state index to `[r, g, b]`.
    pub colors: String,
}

/// Errors from reading a `.rule` file.
#[derive(Debug, PartialEq, Eq)]
pub enum RuleFileError {
    /// File is not valid UTF-8 text.
    NotText,
    /// No `@RULE` line, or it has no name.
    MissingName,
    /// Rule names may only use ASCII letters, digits, `_` and `-`.
    BadName(String),
    /// Neither `n_states:` (tables) nor `num_states=` (trees) was found.
    MissingStateCount,
    /// State count present but not a number in 2..=256.
    BadStateCount(String),
    /// A line under `@COLORS` could not be read as `state r g b`.
    BadColorLine(String),
}

impl std::fmt::Display for RuleFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotText => write!(f, "Rule file is not UTF-8 text"),
            Self::MissingName => write!(f, "Rule file has no @RULE name"),
            Self::BadName(n) => write!(f, "Invalid rule name: {}", n),
            Self::MissingStateCount => write!(f, "Rule file does not declare a state count"),
            Self::BadStateCount(s) => write!(f, "Invalid state count: {}", s),
            Self::BadColorLine(l) => write!(f, "Invalid @COLORS line: {}", l),
        }
    }
}

impl std::error::Error for RuleFileError {}

impl RuleDefinition {
    /// Build a definition from the bytes of a Golly `.rule` file.
    ///
    /// Reads the name from `@RULE`, the state count from `n_states:` in
    /// `@TABLE` or `num_states=` in `@TREE`, and optional colors from
    /// `@COLORS` (`state r g b` per line, `#` starts a comment).
    pub fn from_rule_file(bytes: &[u8]) -> Result<Self, RuleFileError> {
        let text = std::str::from_utf8(bytes).map_err(|_| RuleFileError::NotText)?;

        let mut name = None;
        let mut n_states = None;
        let mut colors: BTreeMap<String, [u8; 3]> = BTreeMap::new();
        let mut section = "";

        for raw in text.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix('@') {
                let mut parts = rest.split_whitespace();
                section = parts.next().unwrap_or("");
                if section == "RULE" {
                    name = parts.next().map(str::to_string);
                }
                continue;
            }

            match section {
                "TABLE" | "TREE" if n_states.is_none() => {
                    let value = line
                        .strip_prefix("n_states:")
                        .or_else(|| line.strip_prefix("num_states="));
                    if let Some(value) = value {
                        let value = value.trim();
                        let parsed = value
                            .parse::<u16>()
                            .ok()
                            .filter(|n| (2..=256).contains(n))
                            .ok_or_else(|| RuleFileError::BadStateCount(value.to_string()))?;
                        n_states = Some(parsed);
                    }
                }
                "COLORS" => {
                    let nums: Vec<&str> = line.split_whitespace().collect();
                    let parsed = match nums.as_slice() {
                        [state, r, g, b] => state.parse::<u16>().ok().zip(
                            r.parse::<u8>()
                                .ok()
                                .zip(g.parse::<u8>().ok())
                                .zip(b.parse::<u8>().ok()),
                        ),
                        _ => None,
                    };
                    let (state, ((r, g), b)) =
                        parsed.ok_or_else(|| RuleFileError::BadColorLine(line.to_string()))?;
                    colors.insert(state.to_string(), [r, g, b]);
                }
                _ => {}
            }
        }

        let name = name.ok_or(RuleFileError::MissingName)?;
        if !is_valid_name(&name) {
            return Err(RuleFileError::BadName(name));
        }
        let n_states = n_states.ok_or(RuleFileError::MissingStateCount)?;
        // BTreeMap<String, [u8; 3]> always serializes
        let colors = serde_json::to_string(&colors).unwrap_or_else(|_| "{}".to_string());

        Ok(Self {
            name,
            file: bytes.to_vec(),
            n_states,
            colors,
        })
    }
}

/// Whether `name` is safe to use as a rule name and file stem.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE_RULE: &str = "@RULE Fader\n\
        # a three state rule\n\
        @TABLE\n\
        n_states:3\n\
        neighborhood:Moore\n\
        symmetries:permute\n\
        0,1,1,1,0,0,0,0,0,1\n\
        @COLORS\n\
        0 48 48 48\n\
        1 255 0 0   # head\n\
        2 0 0 255\n";

    #[test]
    fn test_table_rule_metadata() {
        let def = RuleDefinition::from_rule_file(TABLE_RULE.as_bytes()).unwrap();
        assert_eq!(def.name, "Fader");
        assert_eq!(def.n_states, 3);
        assert_eq!(def.file, TABLE_RULE.as_bytes());

        let colors: BTreeMap<String, [u8; 3]> = serde_json::from_str(&def.colors).unwrap();
        assert_eq!(colors["0"], [48, 48, 48]);
        assert_eq!(colors["1"], [255, 0, 0]);
        assert_eq!(colors["2"], [0, 0, 255]);
    }

    #[test]
    fn test_tree_rule_without_colors() {
        let text = "@RULE Wires\n@TREE\nnum_states=4\nnum_neighbors=8\nnum_nodes=1\n";
        let def = RuleDefinition::from_rule_file(text.as_bytes()).unwrap();
        assert_eq!(def.n_states, 4);
        assert_eq!(def.colors, "{}");
    }

    #[test]
    fn test_missing_pieces() {
        assert_eq!(
            RuleDefinition::from_rule_file(b"@TABLE\nn_states:2\n"),
            Err(RuleFileError::MissingName)
        );
        assert_eq!(
            RuleDefinition::from_rule_file(b"@RULE X\n@TABLE\n"),
            Err(RuleFileError::MissingStateCount)
        );
        assert_eq!(
            RuleDefinition::from_rule_file(b"@RULE X\n@TABLE\nn_states:900\n"),
            Err(RuleFileError::BadStateCount("900".to_string()))
        );
        assert_eq!(
            RuleDefinition::from_rule_file(b"@RULE ../escape\n@TABLE\nn_states:3\n"),
            Err(RuleFileError::BadName("../escape".to_string()))
        );
        assert_eq!(
            RuleDefinition::from_rule_file(b"@RULE a/b\n@TABLE\nn_states:3\n"),
            Err(RuleFileError::BadName("a/b".to_string()))
        );
        assert!(matches!(
            RuleDefinition::from_rule_file(b"@RULE X\n@TABLE\nn_states:2\n@COLORS\n1 red\n"),
            Err(RuleFileError::BadColorLine(_))
        ));
    }
}
