//! Issue/return state machine.
//!
//! Each person is either holding nothing or holding exactly one item.
//! Scanning a code while holding nothing issues it; scanning the held code
//! returns it; scanning any other code while holding something is refused.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const ITEM_CODE_LEN: usize = 8;

pub const STATUS_NOT_ISSUED: &str = "not issued";
pub const STATUS_ISSUED: &str = "issued";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CirculationError {
    #[error("invalid item code {0:?}: expected exactly 8 digits")]
    InvalidItemCode(String),
    #[error("must return {held} first")]
    MustReturnFirst { held: ItemCode },
    #[error("unknown circulation status {0:?}")]
    UnknownStatus(String),
    #[error("status {status:?} is inconsistent with held item {held:?}")]
    Inconsistent { status: String, held: Option<String> },
}

/// An 8-digit item identifier read from a barcode or typed by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemCode(String);

impl ItemCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ItemCode {
    type Err = CirculationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == ITEM_CODE_LEN && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(CirculationError::InvalidItemCode(s.to_string()))
        }
    }
}

impl TryFrom<String> for ItemCode {
    type Error = CirculationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ItemCode> for String {
    fn from(code: ItemCode) -> Self {
        code.0
    }
}

impl fmt::Display for ItemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a successful transition did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Issued(ItemCode),
    Returned(ItemCode),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issued(code) => write!(f, "issued {code}"),
            Self::Returned(code) => write!(f, "returned {code}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CirculationState {
    #[default]
    NotIssued,
    Issued(ItemCode),
}

impl CirculationState {
    /// Rebuild a state from its persisted `(status, held_item)` columns.
    pub fn from_columns(status: &str, held: Option<String>) -> Result<Self, CirculationError> {
        match (status, held) {
            (STATUS_NOT_ISSUED, None) => Ok(Self::NotIssued),
            (STATUS_ISSUED, Some(code)) => code
                .parse()
                .map(Self::Issued)
                .map_err(|_| CirculationError::Inconsistent {
                    status: status.to_string(),
                    held: Some(code),
                }),
            (STATUS_NOT_ISSUED | STATUS_ISSUED, held) => Err(CirculationError::Inconsistent {
                status: status.to_string(),
                held,
            }),
            (other, _) => Err(CirculationError::UnknownStatus(other.to_string())),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::NotIssued => STATUS_NOT_ISSUED,
            Self::Issued(_) => STATUS_ISSUED,
        }
    }

    pub fn held_item(&self) -> Option<&ItemCode> {
        match self {
            Self::NotIssued => None,
            Self::Issued(code) => Some(code),
        }
    }

    /// Compute the transition for `scanned` without touching `self`.
    pub fn next(&self, scanned: &ItemCode) -> Result<(Self, Outcome), CirculationError> {
        match self {
            Self::Issued(held) if held == scanned => {
                Ok((Self::NotIssued, Outcome::Returned(held.clone())))
            }
            Self::Issued(held) => Err(CirculationError::MustReturnFirst { held: held.clone() }),
            Self::NotIssued => Ok((Self::Issued(scanned.clone()), Outcome::Issued(scanned.clone()))),
        }
    }

    /// Validate `raw` and apply the transition. On any error `self` is unchanged.
    pub fn attempt(&mut self, raw: &str) -> Result<Outcome, CirculationError> {
        let scanned: ItemCode = raw.parse()?;
        let (next, outcome) = self.next(&scanned)?;
        *self = next;
        Ok(outcome)
    }
}
