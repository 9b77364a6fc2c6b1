// ********* Input data structures ***********

use std::fmt::Display;

use chrono::NaiveDateTime;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Layout used for every timestamp written to the warehouse.
///
/// Fixed width, so that text comparisons in SQL follow chronological order.
pub const STORAGE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// The fields of a vote event, in the order of the input documents.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum VoteField {
    Id,
    PostId,
    VoteTypeId,
    CreationDate,
    UserId,
    BountyAmount,
}

impl VoteField {
    pub const ALL: [VoteField; 6] = [
        VoteField::Id,
        VoteField::PostId,
        VoteField::VoteTypeId,
        VoteField::CreationDate,
        VoteField::UserId,
        VoteField::BountyAmount,
    ];

    /// The key in the input document, which is also the column name in every table.
    pub fn column(&self) -> &'static str {
        match self {
            VoteField::Id => "Id",
            VoteField::PostId => "PostId",
            VoteField::VoteTypeId => "VoteTypeId",
            VoteField::CreationDate => "CreationDate",
            VoteField::UserId => "UserId",
            VoteField::BountyAmount => "BountyAmount",
        }
    }

    pub fn value<'a>(&self, record: &'a VoteRecord) -> Option<&'a str> {
        let v = match self {
            VoteField::Id => &record.id,
            VoteField::PostId => &record.post_id,
            VoteField::VoteTypeId => &record.vote_type_id,
            VoteField::CreationDate => &record.creation_date,
            VoteField::UserId => &record.user_id,
            VoteField::BountyAmount => &record.bounty_amount,
        };
        v.as_deref()
    }
}

impl Display for VoteField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// A vote event as it was read from a file: every field is kept as text.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct VoteRecord {
    /// 1-based line in the source file.
    pub line_number: u64,
    pub id: Option<String>,
    pub post_id: Option<String>,
    pub vote_type_id: Option<String>,
    pub creation_date: Option<String>,
    pub user_id: Option<String>,
    pub bounty_amount: Option<String>,
}

impl VoteRecord {
    /// Values in the order of `VoteField::ALL`.
    pub fn values(&self) -> [Option<&str>; 6] {
        VoteField::ALL.map(|f| f.value(self))
    }
}

// ******** Staging data structures *********

/// Outcome of the validation of one staged row.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum StagingStatus {
    ReadyToLoad,
    Failed,
    Duplicate,
}

impl StagingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStatus::ReadyToLoad => "READYTOLOAD",
            StagingStatus::Failed => "FAILED",
            StagingStatus::Duplicate => "DUPLICATE",
        }
    }

    pub fn parse(s: &str) -> Option<StagingStatus> {
        match s {
            "READYTOLOAD" => Some(StagingStatus::ReadyToLoad),
            "FAILED" => Some(StagingStatus::Failed),
            "DUPLICATE" => Some(StagingStatus::Duplicate),
            _ => None,
        }
    }
}

impl Display for StagingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct StagingRecord {
    pub record: VoteRecord,
    pub status: StagingStatus,
    /// The violated rules joined with "; ", or empty.
    pub error_description: String,
}

// ******** Operational data structures *********

/// A fixed-point amount with two fractional digits, as in DECIMAL(18,2).
#[derive(Eq, PartialEq, Debug, Clone, Copy, PartialOrd, Ord, Hash)]
pub struct Amount {
    hundredths: i64,
}

impl Amount {
    const MAX_HUNDREDTHS: i128 = 1_000_000_000_000_000_000;

    pub fn from_hundredths(hundredths: i64) -> Option<Amount> {
        if (hundredths as i128).abs() < Amount::MAX_HUNDREDTHS {
            Some(Amount { hundredths })
        } else {
            None
        }
    }

    pub fn hundredths(&self) -> i64 {
        self.hundredths
    }

    /// Parses a plain decimal literal such as `125`, `-3.5` or `.25`.
    ///
    /// Digits past the second decimal are rounded half away from zero. Values with more
    /// than 16 integer digits after rounding are rejected.
    pub fn parse_decimal(s: &str) -> Option<Amount> {
        let s = s.trim();
        let (negative, unsigned) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let int_digits = int_part.trim_start_matches('0');
        if int_digits.len() > 17 {
            return None;
        }
        let int_value: i128 = if int_digits.is_empty() {
            0
        } else {
            int_digits.parse().ok()?
        };
        let frac_bytes = frac_part.as_bytes();
        let digit = |idx: usize| -> i128 {
            frac_bytes
                .get(idx)
                .map(|b| (b - b'0') as i128)
                .unwrap_or(0)
        };
        let mut magnitude = int_value * 100 + digit(0) * 10 + digit(1);
        if digit(2) >= 5 {
            magnitude += 1;
        }
        if magnitude >= Amount::MAX_HUNDREDTHS {
            return None;
        }
        let hundredths = if negative { -magnitude } else { magnitude };
        Some(Amount {
            hundredths: hundredths as i64,
        })
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.hundredths < 0 { "-" } else { "" };
        let abs = self.hundredths.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl ToSql for Amount {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Amount {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let amount = match value {
            ValueRef::Integer(i) => i.checked_mul(100).and_then(Amount::from_hundredths),
            ValueRef::Real(r) => Amount::from_hundredths((r * 100.0).round() as i64),
            ValueRef::Text(t) => std::str::from_utf8(t)
                .ok()
                .and_then(Amount::parse_decimal),
            _ => return Err(FromSqlError::InvalidType),
        };
        amount.ok_or(FromSqlError::InvalidType)
    }
}

/// A value produced by a successful cast of one field.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum FieldValue {
    Integer(i64),
    Timestamp(NaiveDateTime),
    Decimal(Amount),
}

impl FieldValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_amount(&self) -> Option<Amount> {
        match self {
            FieldValue::Decimal(a) => Some(*a),
            _ => None,
        }
    }
}

/// The canonical, typed vote kept in the operational table.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct OperationalRecord {
    pub id: i64,
    pub post_id: Option<i64>,
    pub vote_type_id: Option<i64>,
    pub creation_date: NaiveDateTime,
    pub user_id: Option<i64>,
    pub bounty_amount: Option<Amount>,
}

// ******** Output data structures *********

/// The number of votes for one (year, week) bucket.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyBucket {
    #[serde(rename = "Year")]
    pub year: i64,
    #[serde(rename = "WeekNumber")]
    pub week_number: i64,
    #[serde(rename = "VoteCount")]
    pub vote_count: i64,
}

/// A bucket whose count deviates by more than 20% from the mean of all buckets.
pub type OutlierWeek = WeeklyBucket;

/// Counters for one ingestion run.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct IngestReport {
    pub lines_loaded: u64,
    pub lines_dropped: u64,
    pub ready: u64,
    pub failed: u64,
    pub duplicate: u64,
    /// Rows skipped by the merge because a newer version was already stored.
    pub superseded: u64,
    pub operational_rows: u64,
}
