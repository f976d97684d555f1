//! Parser for the text reply of the rcon `status` command
//!
//! A typical reply looks like:
//!
//! ```text
//! map: q3dm17
//! num score ping name            lastmsg address               qport rate
//! --- ----- ---- --------------- ------- --------------------- ----- -----
//!   0    12   48 ^1Sarge^7             0 10.0.0.5:27960        4312 25000
//!   1    -1   53 Big Boss              0 10.0.0.6:27960        1123 25000
//! ```
//!
//! Rows are split on whitespace. The first three columns are the client slot,
//! the score (may be negative) and the ping. When the row ends with the four
//! standard columns (`lastmsg address qport rate`) everything between the ping
//! and `lastmsg` is the name, so names may contain spaces. Rows with a shorter
//! tail fall back to taking the name up to the first purely numeric field.
//! Anything that does not fit is skipped silently.

use crate::Sample;
use std::collections::{BTreeMap, BTreeSet};

const MAP_PREFIX: &str = "map:";

/// Number of columns that follow the name in a standard status row.
const TRAILING_COLUMNS: usize = 4;

/// Extracts map and tracked player scores from `status` replies.
#[derive(Debug, Clone)]
pub struct StatusParser {
    tracked: BTreeSet<String>,
}

impl StatusParser {
    pub fn new<I, S>(tracked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tracked: tracked.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tracked_players(&self) -> &BTreeSet<String> {
        &self.tracked
    }

    /// Parses a raw reply.
    ///
    /// Returns an empty sample (no scores) when the input is empty or no
    /// tracked player appears in it.
    pub fn parse(&self, raw: &str) -> Sample {
        let mut map = None;
        let mut scores = BTreeMap::new();

        for line in raw.lines() {
            if let Some(value) = parse_map_line(line) {
                map = value;
                continue;
            }

            if let Some((name, score)) = parse_player_row(line) {
                if self.tracked.contains(&name) {
                    scores.insert(name, score);
                }
            }
        }

        Sample { map, scores }
    }
}

/// Removes `^N` color codes from a player name and trims it.
pub fn clean_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '^' && chars.peek().map_or(false, |next| next.is_ascii_digit()) {
            chars.next();
            continue;
        }
        cleaned.push(c);
    }

    cleaned.trim().to_string()
}

/// Splits a comma separated player list, dropping blanks.
pub fn parse_player_list(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns `Some(map)` for a `map:` line, `None` for any other line.
fn parse_map_line(line: &str) -> Option<Option<String>> {
    if !line.starts_with(MAP_PREFIX) {
        return None;
    }

    let value = line.split(':').nth(1).unwrap_or("").trim();
    if value.is_empty() {
        Some(None)
    } else {
        Some(Some(value.to_string()))
    }
}

fn parse_player_row(line: &str) -> Option<(String, i64)> {
    let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
    let len = tokens.len();

    // slot, score, ping, name and at least one trailing number
    if len < 5 {
        return None;
    }
    if !is_digits(tokens[0]) || !is_digits(tokens[2]) {
        return None;
    }
    let score = parse_score(tokens[1])?;

    let name_end = if len >= 4 + TRAILING_COLUMNS
        && is_digits(tokens[len - 4])
        && is_digits(tokens[len - 2])
        && is_digits(tokens[len - 1])
    {
        len - TRAILING_COLUMNS
    } else {
        (4..len).find(|&i| is_numeric_field(tokens[i]))?
    };

    let name = clean_name(&tokens[3..name_end].join(" "));
    if name.is_empty() {
        return None;
    }

    Some((name, score))
}

fn is_digits(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn is_numeric_field(token: &str) -> bool {
    token.bytes().any(|b| b.is_ascii_digit()) && token.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

fn parse_score(token: &str) -> Option<i64> {
    let digits = token.strip_prefix('-').unwrap_or(token);
    if !is_digits(digits) {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_REPLY: &str = "map: q3dm17\n\
        num score ping name            lastmsg address               qport rate\n\
        --- ----- ---- --------------- ------- --------------------- ----- -----\n\
        \x20 0    12   48 ^1Sarge^7             0 10.0.0.5:27960         4312 25000\n\
        \x20 1     7   53 Visor                 0 10.0.0.6:27960         1123 25000\n\
        \x20 2    30   20 Intruder              0 10.0.0.7:27960         9999 25000\n";

    fn parser() -> StatusParser {
        StatusParser::new(["Visor", "Sarge"])
    }

    #[test]
    fn test_parse_full_reply() {
        let sample = parser().parse(STATUS_REPLY);

        assert_eq!(sample.map.as_deref(), Some("q3dm17"));
        assert_eq!(sample.scores.len(), 2);
        assert_eq!(sample.scores.get("Sarge"), Some(&12));
        assert_eq!(sample.scores.get("Visor"), Some(&7));
    }

    #[test]
    fn test_untracked_player_is_dropped() {
        let sample = parser().parse(STATUS_REPLY);
        assert!(!sample.scores.contains_key("Intruder"));
    }

    #[test]
    fn test_clean_name_strips_color_codes() {
        assert_eq!(clean_name("^1Sarge^7"), "Sarge");
        assert_eq!(clean_name("  ^2Vi^3sor "), "Visor");
        assert_eq!(clean_name("Plain"), "Plain");
    }

    #[test]
    fn test_clean_name_keeps_lone_caret() {
        assert_eq!(clean_name("a^b"), "a^b");
        assert_eq!(clean_name("^^1x"), "^x");
        assert_eq!(clean_name("tail^"), "tail^");
    }

    #[test]
    fn test_negative_score() {
        let raw = "map: q3dm1\n  0    -3   40 Sarge   0 10.0.0.5:27960  4312 25000\n";
        let sample = parser().parse(raw);
        assert_eq!(sample.scores.get("Sarge"), Some(&-3));
    }

    #[test]
    fn test_name_with_spaces() {
        let parser = StatusParser::new(["Big Boss"]);
        let raw = "map: q3dm1\n  3     4   61 ^4Big ^7Boss   0 10.0.0.8:27960  2000 25000\n";
        let sample = parser.parse(raw);
        assert_eq!(sample.scores.get("Big Boss"), Some(&4));
    }

    #[test]
    fn test_name_with_numeric_word() {
        let parser = StatusParser::new(["Player 2"]);
        let raw = "  3     9   61 Player 2   0 10.0.0.8:27960  2000 25000\n";
        let sample = parser.parse(raw);
        assert_eq!(sample.scores.get("Player 2"), Some(&9));
    }

    #[test]
    fn test_short_row_fallback() {
        let sample = parser().parse("  0     5   45 Sarge 0\n");
        assert_eq!(sample.scores.get("Sarge"), Some(&5));
        assert_eq!(sample.map, None);
    }

    #[test]
    fn test_bot_address_row() {
        let sample = parser().parse("  4    11    0 Visor   50 bot  0 25000\n");
        assert_eq!(sample.scores.get("Visor"), Some(&11));
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let raw = "map: q3dm1\n\
            num score ping name lastmsg address qport rate\n\
            \x20 0    12 CNCT Sarge   0 10.0.0.5:27960  4312 25000\n\
            \x20 x    12   40 Sarge   0 10.0.0.5:27960  4312 25000\n\
            \x20 0   1.5   40 Sarge   0 10.0.0.5:27960  4312 25000\n\
            \x20 0    12   40 Sarge\n\
            garbage line\n";
        let sample = parser().parse(raw);
        assert_eq!(sample.map.as_deref(), Some("q3dm1"));
        assert!(sample.scores.is_empty());
        assert!(!sample.is_actionable());
    }

    #[test]
    fn test_empty_input() {
        let sample = parser().parse("");
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn test_map_line_variants() {
        assert_eq!(parse_map_line("map: q3dm1"), Some(Some("q3dm1".to_string())));
        assert_eq!(parse_map_line("map:q3tourney2  "), Some(Some("q3tourney2".to_string())));
        assert_eq!(parse_map_line("map: a:b"), Some(Some("a".to_string())));
        assert_eq!(parse_map_line("map:"), Some(None));
        assert_eq!(parse_map_line(" map: q3dm1"), None);
        assert_eq!(parse_map_line("mapname q3dm1"), None);
    }

    #[test]
    fn test_last_duplicate_row_wins() {
        let raw = "  0  1  40 Sarge 0 a 1 2\n  5  8  40 ^1Sarge 0 b 1 2\n";
        let sample = parser().parse(raw);
        assert_eq!(sample.scores.get("Sarge"), Some(&8));
    }

    #[test]
    fn test_crlf_lines() {
        let raw = "map: q3dm7\r\n  0  6  40 Visor  0 10.0.0.6:27960 1 2\r\n";
        let sample = parser().parse(raw);
        assert_eq!(sample.map.as_deref(), Some("q3dm7"));
        assert_eq!(sample.scores.get("Visor"), Some(&6));
    }

    #[test]
    fn test_parse_player_list() {
        let players = parse_player_list(" batman, robin,,penguin ,");
        let expected: BTreeSet<String> = ["batman", "robin", "penguin"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(players, expected);
        assert!(parse_player_list("").is_empty());
    }
}
