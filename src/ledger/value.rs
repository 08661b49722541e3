//! Ledger-native scalar types and the record type that rows are read into and
//! written from.

use std::{collections::BTreeMap, fmt};

use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, Local, SubsecRound, Utc};
use postgres_types::{FromSql, ToSql};

use super::LedgerError;


/// A point in time with an explicit UTC offset and millisecond precision.
///
/// The offset is kept as given and never normalized to UTC. Sub-millisecond
/// digits are truncated on construction, so a value read back from the
/// ledger is equal to the one that was written.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct LedgerTimestamp(DateTime<FixedOffset>);

impl LedgerTimestamp {
    /// The current instant in local wall-clock time with the local UTC offset.
    pub(crate) fn now() -> Self {
        Self::new(Local::now().fixed_offset())
    }

    pub(crate) fn new(dt: DateTime<FixedOffset>) -> Self {
        Self(dt.trunc_subsecs(3))
    }

    pub(crate) fn as_datetime(&self) -> &DateTime<FixedOffset> {
        &self.0
    }
}

impl fmt::Debug for LedgerTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerTimestamp({})", self.0.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Represents the `ledger_timestamp` type defined in `01-ledger-types.sql`.
#[derive(Debug, ToSql, FromSql)]
#[postgres(name = "ledger_timestamp")]
struct RawTimestamp {
    instant: DateTime<Utc>,
    /// Offset east of UTC in seconds.
    utc_offset: i32,
}

impl ToSql for LedgerTimestamp {
    fn to_sql(
        &self,
        ty: &postgres_types::Type,
        out: &mut BytesMut,
    ) -> Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        let raw = RawTimestamp {
            instant: self.0.with_timezone(&Utc),
            utc_offset: self.0.offset().local_minus_utc(),
        };
        raw.to_sql(ty, out)
    }

    fn accepts(ty: &postgres_types::Type) -> bool {
        <RawTimestamp as ToSql>::accepts(ty)
    }

    postgres_types::to_sql_checked!();
}

impl<'a> FromSql<'a> for LedgerTimestamp {
    fn from_sql(
        ty: &postgres_types::Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        let raw = RawTimestamp::from_sql(ty, raw)?;
        let offset = FixedOffset::east_opt(raw.utc_offset)
            .ok_or_else(|| format!("invalid UTC offset of {} seconds", raw.utc_offset))?;
        Ok(Self::new(raw.instant.with_timezone(&offset)))
    }

    fn accepts(ty: &postgres_types::Type) -> bool {
        <RawTimestamp as FromSql>::accepts(ty)
    }
}


/// A fixed-point decimal: `coefficient * 10^exponent`.
///
/// Currency amounts always use exponent -2, i.e. the coefficient is a number
/// of cents. Also represents the `ledger_decimal` type defined in
/// `01-ledger-types.sql`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ToSql, FromSql)]
#[postgres(name = "ledger_decimal")]
pub(crate) struct LedgerDecimal {
    coefficient: i64,
    exponent: i32,
}

impl LedgerDecimal {
    pub(crate) const CURRENCY_EXPONENT: i32 = -2;

    pub(crate) fn new(coefficient: i64, exponent: i32) -> Self {
        Self { coefficient, exponent }
    }

    /// Converts an amount of whole currency units (e.g. `12.34` dollars) into
    /// cents. The float is multiplied by 100 first and the product is then
    /// rounded half away from zero, so inputs that are not exactly
    /// representable (like `1.005`) round according to their binary value.
    ///
    /// Fails with [`LedgerError::OutOfRange`] if the number of cents does not
    /// fit the coefficient.
    pub(crate) fn from_currency(amount: f64) -> Result<Self, LedgerError> {
        // 2^63. The open interval (-2^63, 2^63) leaves out `i64::MIN`, so every
        // converted amount can be negated.
        const LIMIT: f64 = i64::MAX as f64;

        let cents = (amount * 100.0).round();
        if cents.is_nan() || cents.abs() >= LIMIT {
            return Err(LedgerError::OutOfRange(format!(
                "amount {amount:e} cannot be stored as a number of cents",
            )));
        }

        Ok(Self::new(cents as i64, Self::CURRENCY_EXPONENT))
    }

    /// `None` if the coefficient is `i64::MIN`.
    pub(crate) fn checked_neg(self) -> Option<Self> {
        self.coefficient.checked_neg().map(|c| Self::new(c, self.exponent))
    }

    pub(crate) fn coefficient(&self) -> i64 {
        self.coefficient
    }

    pub(crate) fn to_f64(&self) -> f64 {
        // Dividing by the power of ten is exact for the common case of small
        // coefficients, while multiplying by 0.01 and the like is not.
        if self.exponent < 0 {
            self.coefficient as f64 / 10f64.powi(-self.exponent)
        } else {
            self.coefficient as f64 * 10f64.powi(self.exponent)
        }
    }
}

impl fmt::Display for LedgerDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exponent >= 0 {
            return write!(f, "{}{}", self.coefficient, "0".repeat(self.exponent as usize));
        }

        let scale = self.exponent.unsigned_abs() as usize;
        let digits = self.coefficient.unsigned_abs().to_string();
        let digits = format!("{digits:0>width$}", width = scale + 1);
        let (int, frac) = digits.split_at(digits.len() - scale);
        let sign = if self.coefficient < 0 { "-" } else { "" };
        write!(f, "{sign}{int}.{frac}")
    }
}


/// A single field value of a ledger record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    String(String),
    Timestamp(LedgerTimestamp),
    Decimal(LedgerDecimal),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Decimal(_) => "decimal",
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<LedgerTimestamp> for Value {
    fn from(v: LedgerTimestamp) -> Self {
        Self::Timestamp(v)
    }
}

impl From<LedgerDecimal> for Value {
    fn from(v: LedgerDecimal) -> Self {
        Self::Decimal(v)
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &postgres_types::Type,
        out: &mut BytesMut,
    ) -> Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        // The checked variants make sure we never write e.g. a string into a
        // decimal column.
        match self {
            Self::String(v) => v.to_sql_checked(ty, out),
            Self::Timestamp(v) => v.to_sql_checked(ty, out),
            Self::Decimal(v) => v.to_sql_checked(ty, out),
        }
    }

    fn accepts(ty: &postgres_types::Type) -> bool {
        <String as ToSql>::accepts(ty)
            || <LedgerTimestamp as ToSql>::accepts(ty)
            || <LedgerDecimal as ToSql>::accepts(ty)
    }

    postgres_types::to_sql_checked!();
}


/// One row of the ledger: a set of named, typed fields.
///
/// Reading a field with the typed accessors fails with
/// [`LedgerError::DataShape`] if the field is missing or has a different type.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Record(BTreeMap<String, Value>);

impl Record {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub(crate) fn insert(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_owned(), value.into());
    }

    pub(crate) fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn string(&self, field: &str) -> Result<String, LedgerError> {
        match self.require(field)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(wrong_type(field, "string", other)),
        }
    }

    pub(crate) fn timestamp(&self, field: &str) -> Result<LedgerTimestamp, LedgerError> {
        match self.require(field)? {
            Value::Timestamp(t) => Ok(*t),
            other => Err(wrong_type(field, "timestamp", other)),
        }
    }

    pub(crate) fn decimal(&self, field: &str) -> Result<LedgerDecimal, LedgerError> {
        match self.require(field)? {
            Value::Decimal(d) => Ok(*d),
            other => Err(wrong_type(field, "decimal", other)),
        }
    }

    fn require(&self, field: &str) -> Result<&Value, LedgerError> {
        self.get(field)
            .ok_or_else(|| LedgerError::DataShape(format!("field '{field}' is missing")))
    }
}

fn wrong_type(field: &str, expected: &str, actual: &Value) -> LedgerError {
    LedgerError::DataShape(format!(
        "field '{field}' should be a {expected}, but is a {}",
        actual.type_name(),
    ))
}
