use std::sync::Arc;

use crate::ledger::Ledger;


/// The context that is accessible to every resolver in our API.
///
/// It only holds a handle to the ledger, never an open session. Every
/// resolver opens its own session and drops it before returning.
pub(crate) struct Context {
    pub(crate) ledger: Arc<dyn Ledger>,
}

impl juniper::Context for Context {}
