//! API error handling.
//!
//! All resolvers return [`ApiResult`]. Ledger errors are converted into
//! [`ApiError`] via `From`, so resolvers can just use `?`. Juniper reports the
//! error as a field error: the failing field (and its non-null parents) become
//! `null`, all sibling fields are resolved normally.

use std::fmt::Write;
use juniper::{FieldError, IntoFieldError, ScalarValue, graphql_value};

use crate::{ledger::LedgerError, prelude::*};


pub(crate) type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) msg: String,
    pub(crate) kind: ApiErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApiErrorKind {
    /// Some input argument cannot be processed, e.g. an amount that is too
    /// large to be stored.
    InvalidInput,

    /// The ledger connection is not configured correctly.
    LedgerMisconfigured,

    /// The ledger could not be reached or did not execute a statement.
    LedgerUnavailable,

    /// Some server error out of control of the API user.
    InternalServerError,
}

impl ApiErrorKind {
    pub(crate) fn kind_str(&self) -> &str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::LedgerMisconfigured => "LEDGER_MISCONFIGURED",
            Self::LedgerUnavailable => "LEDGER_UNAVAILABLE",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    fn message_prefix(&self) -> &str {
        match self {
            Self::InvalidInput => "Invalid input",
            Self::LedgerMisconfigured => "Ledger misconfigured",
            Self::LedgerUnavailable => "Ledger unavailable",
            Self::InternalServerError => "Internal server error",
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(src: LedgerError) -> Self {
        let kind = match &src {
            LedgerError::Config(_) => ApiErrorKind::LedgerMisconfigured,
            LedgerError::Communication { .. } => ApiErrorKind::LedgerUnavailable,
            LedgerError::DataShape(_) => ApiErrorKind::InternalServerError,
            LedgerError::OutOfRange(_) => ApiErrorKind::InvalidInput,
        };

        // This is the last place where we have the full error. It is very
        // likely sent back to the user right after.
        if kind == ApiErrorKind::InvalidInput {
            debug!("Rejected API input: {src}");
        } else {
            error!("Ledger error: {src}");
            debug!("Detailed error: {src:#?}");
        }

        let mut msg = src.to_string();
        let mut source = std::error::Error::source(&src);
        while let Some(cause) = source {
            let _ = write!(msg, ": {cause}");
            source = cause.source();
        }

        Self { msg, kind }
    }
}

impl<S: ScalarValue> IntoFieldError<S> for ApiError {
    fn into_field_error(self) -> FieldError<S> {
        let msg = format!("{}: {}", self.kind.message_prefix(), self.msg);
        FieldError::new(msg, graphql_value!({
            "kind": (self.kind.kind_str()),
        }))
    }
}
