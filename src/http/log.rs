//! Small inline modules so that individual log messages can be filtered with
//! our log filter system, e.g. `filters."bank_ledger::http::log::headers" = "off"`.

use hyper::Request;
use crate::prelude::*;

pub(super) mod req {
    use super::*;

    pub(crate) fn log<B>(req: &Request<B>) {
        trace!(
            method = ?req.method(),
            path = req.uri().path_and_query().map_or("", |pq| pq.as_str()),
            "Incoming HTTP request",
        );
    }
}

pub(super) mod headers {
    use super::*;

    pub(crate) fn log<B>(req: &Request<B>) {
        if tracing::enabled!(tracing::Level::TRACE) {
            let mut out = String::new();
            for (name, value) in req.headers() {
                use std::fmt::Write;
                let _ = write!(out, "\n  {}: {}", name, String::from_utf8_lossy(value.as_bytes()));
            }
            trace!("HTTP Headers: {}", out);
        }
    }
}
