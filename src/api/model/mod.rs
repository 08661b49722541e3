//! This module and its children define the application logic of the API.

pub(crate) mod account;
pub(crate) mod transaction;
pub(crate) mod transfer;
