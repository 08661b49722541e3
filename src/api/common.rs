//! Scalar types shared by several API types.

use chrono::{FixedOffset, SecondsFormat};
use juniper::{graphql_scalar, InputValue, ScalarValue, Value};


/// A point in time as RFC 3339 string with millisecond precision, keeping the
/// UTC offset it was recorded with. Example: `2024-03-01T09:30:00.250+01:00`.
#[graphql_scalar(name = "DateTime", with = date_time, parse_token(String))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DateTime(pub(crate) chrono::DateTime<FixedOffset>);

mod date_time {
    use super::*;

    pub(super) fn to_output<S: ScalarValue>(v: &DateTime) -> Value<S> {
        Value::scalar(v.0.to_rfc3339_opts(SecondsFormat::Millis, false))
    }

    pub(super) fn from_input<S: ScalarValue>(v: &InputValue<S>) -> Result<DateTime, String> {
        let s = v.as_string_value()
            .ok_or_else(|| format!("expected a string, found: {v}"))?;
        chrono::DateTime::parse_from_rfc3339(s)
            .map(DateTime)
            .map_err(|e| format!("invalid RFC 3339 date time '{s}': {e}"))
    }
}
