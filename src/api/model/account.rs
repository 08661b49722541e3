use juniper::graphql_object;

use crate::api::{Context, err::ApiResult};
use super::transaction::Transaction;


/// A bank account. Accounts are not stored anywhere: an account is just the
/// set of transactions logged with its number.
pub(crate) struct Account {
    account_number: String,
}

impl Account {
    pub(crate) fn new(account_number: String) -> Self {
        Self { account_number }
    }
}

/// A bank account identified by its account number.
#[graphql_object(Context = Context)]
impl Account {
    fn account_number(&self) -> &str {
        &self.account_number
    }

    /// All transactions logged for this account, in no particular order.
    /// Loaded from the ledger every time this field is requested.
    async fn transactions(&self, context: &Context) -> ApiResult<Vec<Transaction>> {
        Transaction::load_for_account(&self.account_number, context).await
    }
}
