//! Fuzzy team-code resolution.
//!
//! The exchange's team codes (embedded in tickers) and the score provider's
//! abbreviations come from different vendors and rarely agree byte-for-byte
//! (RADF vs RAD, UMASS vs MASS, LIBRTY vs LIBERTY). A pair of codes is
//! matched by a fixed ladder of strategies, strongest first; the first tier
//! that matches wins. When a ticker's concatenated away+home run admits
//! several split points, the strongest combined tiers win and remaining ties
//! go to the split sharing the longest common prefix with the provider
//! codes. A failure to resolve is non-fatal: the market is simply excluded
//! from the threshold map.

use dashmap::DashMap;

/// Match tiers, strongest first. Ordering matters: split selection picks the
/// lowest tier pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    Exact,
    Prefix,
    ConsonantSkeleton,
    Compound,
    UPrefix,
}

/// Uppercase, letters only.
pub fn normalize(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'A' | 'E' | 'I' | 'O' | 'U')
}

/// Drop vowels except a leading one: LIBERTY -> LBRTY, OHIO -> OH.
fn consonant_skeleton(normalized: &str) -> String {
    normalized
        .char_indices()
        .filter(|&(i, c)| i == 0 || !is_vowel(c))
        .map(|(_, c)| c)
        .collect()
}

/// Split a raw code on separators and internal case transitions:
/// "Gardner-Webb" -> [GARDNER, WEBB], "StJohns" -> [ST, JOHNS].
fn split_parts(raw: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in raw.chars() {
        if c.is_ascii_alphabetic() {
            if c.is_ascii_uppercase() && prev_lower && !current.is_empty() {
                parts.push(current.clone());
                current.clear();
            }
            current.push(c.to_ascii_uppercase());
            prev_lower = c.is_ascii_lowercase();
        } else {
            if !current.is_empty() {
                parts.push(current.clone());
                current.clear();
            }
            prev_lower = false;
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

fn prefix_match(a: &str, b: &str) -> bool {
    let min_len = a.len().min(b.len());
    min_len >= 3 && (a.starts_with(b) || b.starts_with(a))
}

fn strip_u_prefix(s: &str) -> Option<&str> {
    // UMASS -> MASS, UCONN -> CONN; only for the institutional U + consonant
    // shape, so U + vowel codes (UAB) are left alone.
    let mut chars = s.chars();
    if chars.next() == Some('U') && s.len() > 3 {
        if let Some(second) = chars.next() {
            if !is_vowel(second) {
                return Some(&s[1..]);
            }
        }
    }
    None
}

/// Every part of the smaller list appears in the larger one.
fn subset(a: &[String], b: &[String]) -> bool {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    !small.is_empty() && small.iter().all(|p| large.contains(p))
}

/// Try the strategy ladder on one pair of raw codes.
pub fn match_tier(a_raw: &str, b_raw: &str) -> Option<MatchTier> {
    let a = normalize(a_raw);
    let b = normalize(b_raw);
    if a.is_empty() || b.is_empty() {
        return None;
    }

    if a == b {
        return Some(MatchTier::Exact);
    }
    if prefix_match(&a, &b) {
        return Some(MatchTier::Prefix);
    }
    if consonant_skeleton(&a) == consonant_skeleton(&b) {
        return Some(MatchTier::ConsonantSkeleton);
    }

    let a_parts = split_parts(a_raw);
    let b_parts = split_parts(b_raw);
    if (a_parts.len() > 1 || b_parts.len() > 1) && subset(&a_parts, &b_parts) {
        return Some(MatchTier::Compound);
    }

    match (strip_u_prefix(&a), strip_u_prefix(&b)) {
        (Some(sa), None) if sa == b || prefix_match(sa, &b) => Some(MatchTier::UPrefix),
        (None, Some(sb)) if sb == a || prefix_match(&a, sb) => Some(MatchTier::UPrefix),
        _ => None,
    }
}

/// Split a concatenated away+home run so that both halves resolve against
/// the provider's codes. Among valid splits the strongest combined tiers
/// win; remaining ties go to the split with the longest common prefixes
/// against the provider codes.
pub fn split_team_run(run: &str, away_code: &str, home_code: &str) -> Option<(String, String)> {
    let away_norm = normalize(away_code);
    let home_norm = normalize(home_code);

    let mut best: Option<((MatchTier, MatchTier, std::cmp::Reverse<usize>), usize)> = None;
    for i in 1..run.len() {
        let (left, right) = run.split_at(i);
        let (Some(away_tier), Some(home_tier)) =
            (match_tier(left, away_code), match_tier(right, home_code))
        else {
            continue;
        };
        let prefix_score = common_prefix_len(&normalize(left), &away_norm)
            + common_prefix_len(&normalize(right), &home_norm);
        let score = (
            away_tier.max(home_tier),
            away_tier.min(home_tier),
            std::cmp::Reverse(prefix_score),
        );
        if best.as_ref().map_or(true, |(b, _)| score < *b) {
            best = Some((score, i));
        }
    }
    best.map(|(_, i)| {
        let (left, right) = run.split_at(i);
        (left.to_string(), right.to_string())
    })
}

/// Memoized resolver. Team codes are stable for the lifetime of a game, so
/// every run resolves at most once per (series, game_id). Memoization is
/// observationally transparent: the split is a pure function of its inputs.
#[derive(Debug, Default)]
pub struct TeamResolver {
    memo: DashMap<(String, String, String), Option<(String, String)>>,
}

impl TeamResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized [`split_team_run`], keyed per (series, game_id, run).
    pub fn resolve_run(
        &self,
        series: &str,
        game_id: &str,
        run: &str,
        away_code: &str,
        home_code: &str,
    ) -> Option<(String, String)> {
        let key = (series.to_string(), game_id.to_string(), run.to_string());
        if let Some(cached) = self.memo.get(&key) {
            return cached.clone();
        }
        let result = split_team_run(run, away_code, home_code);
        self.memo.insert(key, result.clone());
        result
    }
}
