//! The validation rules applied to every staged row.
//!
//! Each rule ties a field to a presence requirement, a cast and the message recorded
//! when the rule is violated. The same casts produce the typed values at merge time.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::records::*;

pub const DUPLICATE_FAILURE: &str = "Duplicate record";

/// Separator between the messages of the error description.
pub const FAILURE_SEPARATOR: &str = "; ";

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Presence {
    Required,
    Optional,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: VoteField,
    pub presence: Presence,
    pub cast: fn(&str) -> Option<FieldValue>,
    pub failure: &'static str,
}

/// All the field rules, in the order their failures are reported.
pub static VALIDATION_RULES: [FieldRule; 6] = [
    FieldRule {
        field: VoteField::Id,
        presence: Presence::Required,
        cast: cast_bigint,
        failure: "Invalid Id",
    },
    FieldRule {
        field: VoteField::CreationDate,
        presence: Presence::Required,
        cast: cast_timestamp,
        failure: "Invalid CreationDate",
    },
    FieldRule {
        field: VoteField::PostId,
        presence: Presence::Optional,
        cast: cast_bigint,
        failure: "Invalid PostId",
    },
    FieldRule {
        field: VoteField::VoteTypeId,
        presence: Presence::Optional,
        cast: cast_bigint,
        failure: "Invalid VoteTypeId",
    },
    FieldRule {
        field: VoteField::UserId,
        presence: Presence::Optional,
        cast: cast_bigint,
        failure: "Invalid UserId",
    },
    FieldRule {
        field: VoteField::BountyAmount,
        presence: Presence::Optional,
        cast: cast_decimal,
        failure: "Invalid BountyAmount",
    },
];

impl FieldRule {
    /// The typed value of the field, `None` when an optional field is absent.
    pub fn check(&self, record: &VoteRecord) -> Result<Option<FieldValue>, &'static str> {
        match (self.field.value(record), self.presence) {
            (None, Presence::Required) => Err(self.failure),
            (None, Presence::Optional) => Ok(None),
            (Some(raw), _) => (self.cast)(raw).map(Some).ok_or(self.failure),
        }
    }
}

pub fn rule_for(field: VoteField) -> &'static FieldRule {
    let idx = match field {
        VoteField::Id => 0,
        VoteField::CreationDate => 1,
        VoteField::PostId => 2,
        VoteField::VoteTypeId => 3,
        VoteField::UserId => 4,
        VoteField::BountyAmount => 5,
    };
    &VALIDATION_RULES[idx]
}

/// The messages of all the rules violated by this record, in rule order.
pub fn violations(record: &VoteRecord) -> Vec<&'static str> {
    VALIDATION_RULES
        .iter()
        .filter_map(|rule| rule.check(record).err())
        .collect()
}

pub fn cast_bigint(s: &str) -> Option<FieldValue> {
    s.trim().parse::<i64>().ok().map(FieldValue::Integer)
}

pub fn cast_timestamp(s: &str) -> Option<FieldValue> {
    parse_timestamp(s).map(FieldValue::Timestamp)
}

pub fn cast_decimal(s: &str) -> Option<FieldValue> {
    Amount::parse_decimal(s).map(FieldValue::Decimal)
}

/// Accepts `YYYY-MM-DDTHH:MM:SS[.f]`, the same with a space separator, RFC 3339
/// timestamps with an offset (converted to UTC) and plain dates (midnight).
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t);
        }
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(VoteField, &str)]) -> VoteRecord {
        let mut r = VoteRecord {
            line_number: 1,
            ..Default::default()
        };
        for (f, v) in fields {
            let slot = match f {
                VoteField::Id => &mut r.id,
                VoteField::PostId => &mut r.post_id,
                VoteField::VoteTypeId => &mut r.vote_type_id,
                VoteField::CreationDate => &mut r.creation_date,
                VoteField::UserId => &mut r.user_id,
                VoteField::BountyAmount => &mut r.bounty_amount,
            };
            *slot = Some(v.to_string());
        }
        r
    }

    #[test]
    fn rules_cover_every_field_once() {
        for f in VoteField::ALL {
            assert_eq!(VALIDATION_RULES.iter().filter(|r| r.field == f).count(), 1);
            assert_eq!(rule_for(f).field, f);
        }
    }

    #[test]
    fn valid_record() {
        let r = record(&[
            (VoteField::Id, "7"),
            (VoteField::PostId, "12"),
            (VoteField::VoteTypeId, "2"),
            (VoteField::CreationDate, "2022-01-02T00:00:00.000"),
            (VoteField::UserId, " 40 "),
            (VoteField::BountyAmount, "50"),
        ]);
        assert!(violations(&r).is_empty());
    }

    #[test]
    fn only_id_and_creation_date_are_required() {
        let r = record(&[(VoteField::PostId, "1")]);
        assert_eq!(violations(&r), vec!["Invalid Id", "Invalid CreationDate"]);
        let r = record(&[
            (VoteField::Id, "1"),
            (VoteField::CreationDate, "2022-01-02"),
        ]);
        assert!(violations(&r).is_empty());
    }

    #[test]
    fn failures_follow_rule_order() {
        let r = record(&[
            (VoteField::BountyAmount, "lots"),
            (VoteField::UserId, "bob"),
            (VoteField::Id, "x1"),
            (VoteField::CreationDate, "2022-01-02T00:00:00"),
            (VoteField::PostId, ""),
        ]);
        assert_eq!(
            violations(&r),
            vec![
                "Invalid Id",
                "Invalid PostId",
                "Invalid UserId",
                "Invalid BountyAmount"
            ]
        );
    }

    #[test]
    fn integer_casts() {
        assert_eq!(cast_bigint("42"), Some(FieldValue::Integer(42)));
        assert_eq!(cast_bigint(" -3 "), Some(FieldValue::Integer(-3)));
        assert_eq!(cast_bigint("+8"), Some(FieldValue::Integer(8)));
        assert_eq!(cast_bigint("9223372036854775807"), Some(FieldValue::Integer(i64::MAX)));
        assert_eq!(cast_bigint("9223372036854775808"), None);
        assert_eq!(cast_bigint("1.5"), None);
        assert_eq!(cast_bigint(""), None);
        assert_eq!(cast_bigint("abc"), None);
    }

    #[test]
    fn timestamp_casts() {
        let t = |s: &str| parse_timestamp(s).map(|t| t.to_string());
        assert_eq!(
            t("2022-01-02T03:04:05.123456"),
            Some("2022-01-02 03:04:05.123456".to_string())
        );
        assert_eq!(t("2022-01-02 03:04:05"), Some("2022-01-02 03:04:05".to_string()));
        assert_eq!(t("2022-01-02"), Some("2022-01-02 00:00:00".to_string()));
        assert_eq!(
            t("2022-01-02T03:04:05+02:00"),
            Some("2022-01-02 01:04:05".to_string())
        );
        assert_eq!(t("2022-13-02T00:00:00.000"), None);
        assert_eq!(t("2022-02-30"), None);
        assert_eq!(t("yesterday"), None);
        assert_eq!(t(""), None);
    }
}
