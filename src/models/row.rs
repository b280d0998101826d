// src/models/row.rs

//! Election result rows, before and after aggregation.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::LocationNode;

/// Column names used in every CSV the pipeline reads or writes.
pub mod columns {
    pub const PROVINCE: &str = "시도명";
    pub const DISTRICT: &str = "시군구명";
    pub const TOWN: &str = "읍면동명";
    pub const PRECINCT: &str = "투표구명";
    pub const ELIGIBLE_VOTERS: &str = "선거인수";
    pub const VOTES_CAST: &str = "투표수";
    pub const TOTAL_VALID: &str = "계";
    pub const INVALID: &str = "무효투표수";
    pub const ABSTENTIONS: &str = "기권자수";
    pub const LEVEL: &str = "집계수준";

    /// Administrative columns, in canonical output order.
    pub const ADMINISTRATIVE: [&str; 4] = [PROVINCE, DISTRICT, TOWN, PRECINCT];

    /// Numeric columns that precede the candidate block.
    pub const LEADING_COUNTS: [&str; 2] = [ELIGIBLE_VOTERS, VOTES_CAST];

    /// Numeric columns that follow the candidate block.
    pub const TRAILING_COUNTS: [&str; 3] = [TOTAL_VALID, INVALID, ABSTENTIONS];
}

/// Numeric part of a row. Candidate keys vary per election.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounts {
    pub eligible_voters: u64,
    pub votes_cast: u64,
    pub candidate_votes: HashMap<String, u64>,
    pub total_valid_votes: u64,
    pub invalid_votes: u64,
    pub abstentions: u64,
}

impl VoteCounts {
    /// Votes for a candidate, 0 when the candidate is absent.
    pub fn candidate(&self, name: &str) -> u64 {
        self.candidate_votes.get(name).copied().unwrap_or(0)
    }

    /// Add every numeric field of `other` into `self`, saturating at `u64::MAX`.
    pub fn accumulate(&mut self, other: &VoteCounts) {
        self.eligible_voters = self.eligible_voters.saturating_add(other.eligible_voters);
        self.votes_cast = self.votes_cast.saturating_add(other.votes_cast);
        self.total_valid_votes = self.total_valid_votes.saturating_add(other.total_valid_votes);
        self.invalid_votes = self.invalid_votes.saturating_add(other.invalid_votes);
        self.abstentions = self.abstentions.saturating_add(other.abstentions);
        for (name, votes) in &other.candidate_votes {
            let total = self.candidate_votes.entry(name.clone()).or_insert(0);
            *total = total.saturating_add(*votes);
        }
    }

    /// Value of a fixed numeric column by its CSV header.
    pub fn fixed(&self, column: &str) -> Option<u64> {
        match column {
            columns::ELIGIBLE_VOTERS => Some(self.eligible_voters),
            columns::VOTES_CAST => Some(self.votes_cast),
            columns::TOTAL_VALID => Some(self.total_valid_votes),
            columns::INVALID => Some(self.invalid_votes),
            columns::ABSTENTIONS => Some(self.abstentions),
            _ => None,
        }
    }

    /// Mutable access to a fixed numeric column by its CSV header.
    pub fn fixed_mut(&mut self, column: &str) -> Option<&mut u64> {
        match column {
            columns::ELIGIBLE_VOTERS => Some(&mut self.eligible_voters),
            columns::VOTES_CAST => Some(&mut self.votes_cast),
            columns::TOTAL_VALID => Some(&mut self.total_valid_votes),
            columns::INVALID => Some(&mut self.invalid_votes),
            columns::ABSTENTIONS => Some(&mut self.abstentions),
            _ => None,
        }
    }

    /// Votes cast over eligible voters as a percentage; 0 without voters.
    pub fn turnout_pct(&self) -> f64 {
        turnout_pct(self.eligible_voters, self.votes_cast)
    }
}

/// Turnout percentage, defined as 0 when nobody was eligible.
pub fn turnout_pct(eligible_voters: u64, votes_cast: u64) -> f64 {
    if eligible_voters == 0 {
        0.0
    } else {
        votes_cast as f64 / eligible_voters as f64 * 100.0
    }
}

/// Parse a vote count such as `"1,234"`.
///
/// Thousands separators and surrounding whitespace are ignored; a decimal
/// form like `"12.0"` is accepted when it is a whole non-negative number.
/// Returns `None` for empty or non-numeric text and for values that do
/// not fit in a `u64`.
pub fn parse_count(raw: &str) -> Option<u64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(value) = cleaned.parse::<u64>() {
        return Some(value);
    }
    match cleaned.parse::<f64>() {
        // 2^64 is the first whole f64 past u64::MAX
        Ok(value)
            if value.is_finite()
                && value >= 0.0
                && value < 18_446_744_073_709_551_616.0
                && value.fract() == 0.0 =>
        {
            Some(value as u64)
        }
        _ => None,
    }
}

/// [`parse_count`], coercing unusable cells to 0 with a warning.
pub fn coerce_count(raw: &str, context: &str) -> u64 {
    parse_count(raw).unwrap_or_else(|| {
        if raw.trim().is_empty() {
            log::warn!("Empty numeric cell in {context}, using 0");
        } else {
            log::warn!("Non-numeric cell '{}' in {context}, using 0", raw.trim());
        }
        0
    })
}

/// One precinct-level (or summary) line of a result table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionRow {
    pub province_name: String,
    pub district_name: String,
    pub town_name: String,
    pub precinct_name: String,
    pub counts: VoteCounts,
}

impl ElectionRow {
    /// `votes_cast == total_valid_votes + invalid_votes`.
    pub fn is_consistent(&self) -> bool {
        self.counts
            .total_valid_votes
            .checked_add(self.counts.invalid_votes)
            .is_some_and(|sum| sum == self.counts.votes_cast)
    }

    /// Administrative value by its CSV header.
    pub fn admin(&self, column: &str) -> Option<&str> {
        match column {
            columns::PROVINCE => Some(&self.province_name),
            columns::DISTRICT => Some(&self.district_name),
            columns::TOWN => Some(&self.town_name),
            columns::PRECINCT => Some(&self.precinct_name),
            _ => None,
        }
    }

    /// Mutable administrative value by its CSV header.
    pub fn admin_mut(&mut self, column: &str) -> Option<&mut String> {
        match column {
            columns::PROVINCE => Some(&mut self.province_name),
            columns::DISTRICT => Some(&mut self.district_name),
            columns::TOWN => Some(&mut self.town_name),
            columns::PRECINCT => Some(&mut self.precinct_name),
            _ => None,
        }
    }
}

/// Rows extracted from a single source file.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    /// File the rows came from
    pub source: String,
    pub location: Option<LocationNode>,
    /// Candidate columns in header order
    pub candidates: Vec<String>,
    pub rows: Vec<ElectionRow>,
}

/// A merged table: rows plus the union of candidate columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    /// Candidate columns in first-seen order
    pub candidates: Vec<String>,
    pub rows: Vec<ElectionRow>,
}

impl Dataset {
    /// Header in canonical order.
    pub fn columns(&self) -> Vec<String> {
        columns::ADMINISTRATIVE
            .iter()
            .chain(columns::LEADING_COUNTS.iter())
            .map(|c| c.to_string())
            .chain(self.candidates.iter().cloned())
            .chain(columns::TRAILING_COUNTS.iter().map(|c| c.to_string()))
            .collect()
    }
}

/// Administrative level used for grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdminLevel {
    /// 시도
    Province,
    /// 시군구
    District,
    /// 읍면동
    Town,
}

impl AdminLevel {
    pub const ALL: [AdminLevel; 3] = [Self::Province, Self::District, Self::Town];

    /// Value written into the level tag column.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Province => "시도",
            Self::District => "시군구",
            Self::Town => "읍면동",
        }
    }

    /// Stem used for per-level output files.
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::Province => "sido",
            Self::District => "sigungu",
            Self::Town => "eupmyeondong",
        }
    }

    /// Administrative columns forming the grouping key.
    pub fn key_columns(self) -> &'static [&'static str] {
        match self {
            Self::Province => &columns::ADMINISTRATIVE[..1],
            Self::District => &columns::ADMINISTRATIVE[..2],
            Self::Town => &columns::ADMINISTRATIVE[..3],
        }
    }

    /// Number of key segments.
    pub fn depth(self) -> usize {
        self.key_columns().len()
    }
}

impl fmt::Display for AdminLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One grouped line: key segments down to `level`, summed counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedRow {
    pub level: AdminLevel,
    /// Key values, one per `level.key_columns()`
    pub key: Vec<String>,
    pub counts: VoteCounts,
}

impl AggregatedRow {
    /// Key value for an administrative column, `None` above this level.
    pub fn key_value(&self, column: &str) -> Option<&str> {
        self.level
            .key_columns()
            .iter()
            .position(|c| *c == column)
            .and_then(|i| self.key.get(i))
            .map(String::as_str)
    }
}

/// Per-level totals for the summary report.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSummary {
    pub level: AdminLevel,
    pub row_count: usize,
    pub eligible_voters: u64,
    pub votes_cast: u64,
    pub turnout_pct: f64,
}
