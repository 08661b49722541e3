use juniper::graphql_object;

use super::{
    Context,
    err::ApiResult,
    model::{
        transaction::{NewTransaction, Transaction},
        transfer::{NewTransfer, Transfer},
    },
};


/// The root mutation object.
pub(crate) struct Mutation;

#[graphql_object(Context = Context)]
impl Mutation {
    /// Appends a single transaction to the ledger. `amount` is given in
    /// currency units and rounded to whole cents. Positive amounts are
    /// credits, negative ones debits. Returns the logged transaction.
    async fn log_transaction(
        account_number: String,
        amount: f64,
        description: String,
        context: &Context,
    ) -> ApiResult<Transaction> {
        Transaction::log(NewTransaction { account_number, amount, description }, context).await
    }

    /// Moves `amount` from `fromAccount` to `toAccount` by appending a debit
    /// and a credit transaction with a single ledger statement. Either both
    /// are recorded or neither is.
    async fn transfer(
        from_account: String,
        to_account: String,
        amount: f64,
        description: String,
        context: &Context,
    ) -> ApiResult<Transfer> {
        Transfer::perform(NewTransfer { from_account, to_account, amount, description }, context).await
    }
}
