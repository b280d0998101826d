// src/models/election.rs

//! Supported election types and their portal parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Election type, selected by the portal's numeric election code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ElectionType {
    Presidential,
    NationalAssembly,
    Governor,
    Mayor,
    MetropolitanCouncil,
    BasicCouncil,
    Overseas,
    ByElection,
}

impl ElectionType {
    pub const ALL: [ElectionType; 8] = [
        Self::Presidential,
        Self::NationalAssembly,
        Self::Governor,
        Self::Mayor,
        Self::MetropolitanCouncil,
        Self::BasicCouncil,
        Self::Overseas,
        Self::ByElection,
    ];

    /// Numeric code used by the portal.
    pub fn code(self) -> u8 {
        match self {
            Self::Presidential => 1,
            Self::NationalAssembly => 2,
            Self::Governor => 3,
            Self::Mayor => 4,
            Self::MetropolitanCouncil => 5,
            Self::BasicCouncil => 6,
            Self::Overseas => 7,
            Self::ByElection => 8,
        }
    }

    /// Report statement id for the per-precinct result export.
    pub fn statement_id(self) -> &'static str {
        match self {
            Self::Presidential => "VCCP08_#1",
            Self::NationalAssembly => "VCCP08_#2_1",
            Self::Governor => "VCCP08_#3",
            Self::Mayor => "VCCP08_#4",
            Self::MetropolitanCouncil => "VCCP08_#5",
            Self::BasicCouncil => "VCCP08_#6",
            Self::Overseas => "VCCP08_#7_1",
            Self::ByElection => "VCCP08_#8",
        }
    }

    /// Council elections are reported per constituency inside each district.
    pub fn has_constituency_level(self) -> bool {
        matches!(self, Self::MetropolitanCouncil | Self::BasicCouncil)
    }

    /// Korean label used in report titles.
    pub fn label(self) -> &'static str {
        match self {
            Self::Presidential => "대통령선거",
            Self::NationalAssembly => "국회의원선거",
            Self::Governor => "시·도지사선거",
            Self::Mayor => "구·시·군의 장선거",
            Self::MetropolitanCouncil => "시·도의회의원선거",
            Self::BasicCouncil => "구·시·군의회의원선거",
            Self::Overseas => "재외투표",
            Self::ByElection => "재·보궐선거",
        }
    }
}

impl TryFrom<u8> for ElectionType {
    type Error = AppError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or_else(|| {
                AppError::config(format!(
                    "Unsupported election code {code} (expected 1-8)"
                ))
            })
    }
}

impl From<ElectionType> for u8 {
    fn from(value: ElectionType) -> Self {
        value.code()
    }
}

impl fmt::Display for ElectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.code())
    }
}
