//! Run-length encoded rows as emitted by the simulation engine.
//!
//! A generation's pattern line looks like `3o$b2o2$.A2B!`: runs of
//! `count? symbol`, rows separated by `$`, and `N$` standing for N row breaks.

/// Highest state index representable in the multi-state alphabet.
pub const MAX_STATE: u16 = 255;

/// Symbol alphabet used to spell cell states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    /// `b` for dead, `o` for alive.
    TwoState,
    /// `.` for state 0, `A`..`X` for 1..24, `pA`..`yO` for 25..255.
    MultiState,
}

impl Alphabet {
    /// Alphabet the engine uses for a rule with `n_states` states.
    pub fn for_states(n_states: u16) -> Self {
        if n_states <= 2 {
            Self::TwoState
        } else {
            Self::MultiState
        }
    }

    /// Spell a state in this alphabet.
    pub fn symbol(&self, state: u16) -> Option<String> {
        match self {
            Self::TwoState => match state {
                0 => Some("b".to_string()),
                1 => Some("o".to_string()),
                _ => None,
            },
            Self::MultiState => {
                if state == 0 {
                    return Some(".".to_string());
                }
                if state > MAX_STATE {
                    return None;
                }
                let idx = state - 1;
                let letter = (b'A' + (idx % 24) as u8) as char;
                if idx < 24 {
                    Some(letter.to_string())
                } else {
                    let prefix = (b'p' + (idx / 24 - 1) as u8) as char;
                    Some(format!("{}{}", prefix, letter))
                }
            }
        }
    }
}

/// One `(length, state)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub len: u32,
    pub state: u16,
}

/// Errors while reading or writing run-length rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// A character that is neither a count digit nor a state symbol.
    UnexpectedChar { ch: char, offset: usize },
    /// A count with nothing after it.
    DanglingCount,
    /// A count too large to represent.
    CountOverflow,
    /// A state that the requested alphabet cannot spell.
    Unencodable(u16),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedChar { ch, offset } => {
                write!(f, "unexpected character {:?} at offset {}", ch, offset)
            }
            Self::DanglingCount => write!(f, "run count without a symbol"),
            Self::CountOverflow => write!(f, "run count too large"),
            Self::Unencodable(s) => write!(f, "state {} has no symbol in this alphabet", s),
        }
    }
}

impl std::error::Error for RunError {}

/// A single row of a generation in run-length form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunEncodedRow {
    pub runs: Vec<Run>,
}

impl RunEncodedRow {
    /// Number of cells the row spans.
    pub fn width(&self) -> u64 {
        self.runs.iter().map(|r| r.len as u64).sum()
    }

    /// Expand the row into one state per cell.
    pub fn cells(&self) -> impl Iterator<Item = u16> + '_ {
        self.runs
            .iter()
            .flat_map(|r| std::iter::repeat(r.state).take(r.len as usize))
    }

    /// Spell the row back out; runs of one omit their count.
    pub fn encode(&self, alphabet: Alphabet) -> Result<String, RunError> {
        let mut out = String::new();
        for run in &self.runs {
            let symbol = alphabet
                .symbol(run.state)
                .ok_or(RunError::Unencodable(run.state))?;
            if run.len != 1 {
                out.push_str(&run.len.to_string());
            }
            out.push_str(&symbol);
        }
        Ok(out)
    }
}

/// Split a pattern line into rows.
///
/// `N$` closes the current row and adds N-1 empty rows after it; a `!`
/// ends the pattern. Whitespace is ignored. Adjacent runs of the same
/// state are kept as written.
pub fn parse_rows(pattern: &str) -> Result<Vec<RunEncodedRow>, RunError> {
    let mut rows = Vec::new();
    let mut current = RunEncodedRow::default();
    let mut count: Option<u32> = None;
    let mut chars = pattern.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        match ch {
            '0'..='9' => {
                let digit = ch as u32 - '0' as u32;
                let next = count
                    .unwrap_or(0)
                    .checked_mul(10)
                    .and_then(|c| c.checked_add(digit))
                    .ok_or(RunError::CountOverflow)?;
                count = Some(next);
            }
            '$' => {
                let breaks = count.take().unwrap_or(1);
                rows.push(std::mem::take(&mut current));
                for _ in 1..breaks {
                    rows.push(RunEncodedRow::default());
                }
            }
            '!' => break,
            c if c.is_whitespace() => {
                if count.is_some() {
                    return Err(RunError::UnexpectedChar { ch, offset });
                }
            }
            _ => {
                let state = match ch {
                    'b' | '.' => 0,
                    'o' => 1,
                    'A'..='X' => ch as u16 - 'A' as u16 + 1,
                    'p'..='y' => {
                        let letter = match chars.next() {
                            Some((_, l @ 'A'..='X')) => l,
                            Some((off, other)) => {
                                return Err(RunError::UnexpectedChar {
                                    ch: other,
                                    offset: off,
                                })
                            }
                            None => return Err(RunError::UnexpectedChar { ch, offset }),
                        };
                        let state = 24 * (ch as u16 - 'p' as u16 + 1)
                            + (letter as u16 - 'A' as u16)
                            + 1;
                        if state > MAX_STATE {
                            return Err(RunError::UnexpectedChar { ch: letter, offset });
                        }
                        state
                    }
                    _ => return Err(RunError::UnexpectedChar { ch, offset }),
                };
                let len = count.take().unwrap_or(1);
                current.runs.push(Run { len, state });
            }
        }
    }

    if count.is_some() {
        return Err(RunError::DanglingCount);
    }
    rows.push(current);
    Ok(rows)
}
