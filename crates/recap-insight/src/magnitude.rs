//! Edit magnitude scoring.
//!
//! A cheap, non-semantic 0-100 score of how much a piece of content changed.
//! Used to bucket edits for highlights and to skip trivial edits entirely.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Event metadata key holding the edit score.
pub const MAGNITUDE_KEY: &str = "magnitude";
/// Event metadata key holding the edit bucket.
pub const BUCKET_KEY: &str = "magnitude_bucket";

/// Coarse classification of an edit score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMagnitude {
    /// Score below 20.
    Minor,
    /// Score 20 to 49.
    Moderate,
    /// Score 50 and above.
    Major,
}

impl EditMagnitude {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=19 => Self::Minor,
            20..=49 => Self::Moderate,
            _ => Self::Major,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Major => "major",
        }
    }
}

impl fmt::Display for EditMagnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default cap on the characters compared after the shared prefix and
/// suffix are stripped.
pub const DEFAULT_MAX_COMPARED_CHARS: usize = 2000;

/// Upper bound on substring table cells filled per comparison order.
const CELL_BUDGET: usize = 16_000_000;

/// Scores the difference between two versions of a text blob.
pub struct MagnitudeScorer {
    tag_regex: Regex,
    whitespace_regex: Regex,
    max_chars: usize,
}

impl MagnitudeScorer {
    pub fn new() -> Self {
        Self {
            tag_regex: Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"),
            whitespace_regex: Regex::new(r"\s+").expect("whitespace pattern is valid"),
            max_chars: DEFAULT_MAX_COMPARED_CHARS,
        }
    }

    /// Limit how many differing characters of each side are compared.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    /// Change score in `[0, 100]`; 0 means identical after normalization.
    pub fn score(&self, old_text: &str, new_text: &str) -> u8 {
        let old = self.normalize(old_text);
        let new = self.normalize(new_text);

        match (old.is_empty(), new.is_empty()) {
            (true, true) => return 0,
            (true, false) | (false, true) => return 100,
            _ => {}
        }
        if old == new {
            return 0;
        }

        let similarity = similarity_percent(&old, &new, self.max_chars);
        (100.0 - similarity.round()).clamp(0.0, 100.0) as u8
    }

    /// Score and bucket in one call.
    pub fn classify(&self, old_text: &str, new_text: &str) -> (u8, EditMagnitude) {
        let score = self.score(old_text, new_text);
        (score, EditMagnitude::from_score(score))
    }

    /// Strip tags, decode common entities, collapse whitespace and trim.
    pub fn normalize(&self, text: &str) -> String {
        let stripped = self.tag_regex.replace_all(text, " ");
        let decoded = decode_entities(&stripped);
        self.whitespace_regex
            .replace_all(&decoded, " ")
            .trim()
            .to_string()
    }
}

impl Default for MagnitudeScorer {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_entities(text: &str) -> String {
    const ENTITIES: [(&str, &str); 8] = [
        ("&nbsp;", " "),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
        ("&#039;", "'"),
        ("&apos;", "'"),
        // Last so "&amp;lt;" decodes to "&lt;" rather than "<".
        ("&amp;", "&"),
    ];
    let mut out = text.to_string();
    for (entity, replacement) in ENTITIES {
        if out.contains(entity) {
            out = out.replace(entity, replacement);
        }
    }
    out
}

/// Symmetric similar-text percentage.
///
/// The common-substring count depends on argument order when there are
/// several longest matches, so both orders are averaged. Inputs longer than
/// `max_chars` have their shared prefix and suffix counted directly and only
/// the first `max_chars` of what remains compared.
fn similarity_percent(a: &str, b: &str, max_chars: usize) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = (a.len() + b.len()) as f64;
    if total == 0.0 {
        return 100.0;
    }
    let (a_cmp, b_cmp, shared) = if a.len().max(b.len()) > max_chars {
        bounded_window(&a, &b, max_chars)
    } else {
        (&a[..], &b[..], 0)
    };
    let forward = (shared + common_chars(a_cmp, b_cmp)) as f64;
    let backward = (shared + common_chars(b_cmp, a_cmp)) as f64;
    ((forward + backward) / 2.0) * 2.0 / total * 100.0
}

/// Strip the shared prefix and suffix, then cap each remainder.
fn bounded_window<'a>(
    a: &'a [char],
    b: &'a [char],
    max_chars: usize,
) -> (&'a [char], &'a [char], usize) {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let (a, b) = (&a[prefix..], &b[prefix..]);
    let suffix = a
        .iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let (a, b) = (&a[..a.len() - suffix], &b[..b.len() - suffix]);
    (
        &a[..a.len().min(max_chars)],
        &b[..b.len().min(max_chars)],
        prefix + suffix,
    )
}

/// Characters shared by `a` and `b`: the longest common substring plus the
/// common characters to its left and right.
///
/// Stops early once `CELL_BUDGET` table cells have been spent. That can
/// only undercount, so pathological inputs score as larger edits.
fn common_chars(a: &[char], b: &[char]) -> usize {
    let mut budget = CELL_BUDGET;
    let mut total = 0;
    let mut pending = vec![(a, b)];

    while let Some((a, b)) = pending.pop() {
        if a.is_empty() || b.is_empty() {
            continue;
        }
        let cells = a.len() * b.len();
        if cells > budget {
            break;
        }
        budget -= cells;

        let (pos_a, pos_b, len) = longest_common_substring(a, b);
        if len == 0 {
            continue;
        }
        total += len;
        pending.push((&a[pos_a + len..], &b[pos_b + len..]));
        pending.push((&a[..pos_a], &b[..pos_b]));
    }
    total
}

/// First longest common substring as (start in a, start in b, length).
fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                curr[j] = prev[j - 1] + 1;
                if curr[j] > best.2 {
                    best = (i - curr[j], j - curr[j], curr[j]);
                }
            } else {
                curr[j] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    best
}
