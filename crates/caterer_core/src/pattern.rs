//! Where starting patterns come from.
//!
//! A request either carries its pattern inline, asks for a random soup, or
//! leaves it out, in which case the most recent headed pattern in the
//! conversation history is used.

use crate::rule::is_rulestring;
use rand::Rng;

/// Number of history messages searched for a pattern or rule.
pub const DEFAULT_LOOKBACK: usize = 50;

/// Largest soup, in cells.
pub const MAX_SOUP_AREA: u64 = 1024 * 1024;

/// A pattern found under an `x = .., y = ..` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadedPattern {
    /// Run-length body, possibly spanning several lines.
    pub body: String,
    /// Rule named in the header, if any.
    pub rule: Option<String>,
}

/// Read a header line of the form `x = 3, y = 3, rule = B3/S23`.
///
/// Returns the rule field, `Some(None)` when the header has none, and `None`
/// when the line is not a header.
fn parse_header(line: &str) -> Option<Option<String>> {
    let mut fields = line.split(',').map(str::trim);

    let mut key_value = |key: &str| {
        let field = fields.next()?;
        let (k, v) = field.split_once('=')?;
        (k.trim().eq_ignore_ascii_case(key)).then(|| v.trim().to_string())
    };

    let x = key_value("x")?;
    let y = key_value("y")?;
    if x.is_empty()
        || y.is_empty()
        || !x.bytes().all(|b| b.is_ascii_digit())
        || !y.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let rule = key_value("rule")
        .and_then(|r| r.split_whitespace().next().map(str::to_string))
        .filter(|r| !r.is_empty());
    Some(rule)
}

fn is_body_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, 'b' | 'o' | '.' | '$' | '!') || c.is_ascii_uppercase()
}

/// First headed pattern in a message.
pub fn find_headed_pattern(text: &str) -> Option<HeadedPattern> {
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let Some(rule) = parse_header(line.trim().trim_matches('`')) else {
            continue;
        };

        let mut body = String::new();
        for next in &lines[i + 1..] {
            let next = next.trim();
            if next.is_empty() || !next.chars().all(is_body_char) {
                break;
            }
            match next.find('!') {
                Some(end) => {
                    body.push_str(&next[..=end]);
                    break;
                }
                None => {
                    body.push_str(next);
                    body.push('\n');
                }
            }
        }

        if body.chars().any(|c| matches!(c, 'b' | 'o' | '.' | '$') || c.is_ascii_uppercase()) {
            return Some(HeadedPattern {
                body: body.trim_end().to_string(),
                rule,
            });
        }
    }
    None
}

/// Most recent headed pattern within the lookback window.
///
/// `history` is ordered newest first.
pub fn find_recent_pattern<'a, I>(history: I, lookback: usize) -> Option<HeadedPattern>
where
    I: IntoIterator<Item = &'a str>,
{
    history
        .into_iter()
        .take(lookback)
        .find_map(find_headed_pattern)
}

/// Most recent rulestring mentioned within the lookback window.
///
/// Only rules the engine understands natively are picked up; uploaded rule
/// names are never guessed from free text.
pub fn find_recent_rule<'a, I>(history: I, lookback: usize) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    history.into_iter().take(lookback).find_map(|message| {
        message
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '(' | ')')))
            .find(|word| !word.is_empty() && is_rulestring(word))
            .map(str::to_string)
    })
}

/// Strip code-block markers around an inline pattern.
pub fn clean_inline(pattern: &str) -> String {
    pattern.trim().trim_matches('`').trim().to_string()
}

/// Random soup of the given dimensions as a headed run-length pattern.
///
/// Run lengths follow a geometric-looking distribution and alternate between
/// live and dead cells, which gives natural-looking soups.
pub fn make_soup<R: Rng + ?Sized>(rule: &str, width: u32, height: u32, rng: &mut R) -> String {
    let mut rle = format!("x = {}, y = {}, rule = {}\n", width, height, rule);
    let mut live = true;

    for row in 0..height {
        let mut remaining = width;
        while remaining > 0 {
            let u: f64 = rng.gen();
            let run = ((-(1.0 - u).ln()).ceil() as u32).clamp(1, remaining);
            if run > 1 {
                rle.push_str(&run.to_string());
            }
            rle.push(if live { 'o' } else { 'b' });
            live = !live;
            remaining -= run;
        }
        rle.push_str(if row + 1 < height { "$\n" } else { "!\n" });
    }
    if height == 0 {
        rle.push_str("!\n");
    }
    rle
}

/// Body of a pattern produced by [`make_soup`], without its header.
pub fn soup_body(soup: &str) -> &str {
    soup.split_once('\n').map_or(soup, |(_, body)| body)
}
