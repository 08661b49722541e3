use juniper::graphql_object;

use super::{Context, model::account::Account};


/// The root query object.
pub(crate) struct Query;

#[graphql_object(Context = Context)]
impl Query {
    /// Returns a fixed greeting. Only kept so that old clients checking for
    /// liveness keep working.
    #[graphql(deprecated = "Query `account` instead.")]
    fn hello() -> &'static str {
        "Hello world!"
    }

    /// Returns the account with the given number. Accounts exist implicitly:
    /// every account number is valid, unknown ones just have no transactions.
    fn account(account_number: String) -> Account {
        Account::new(account_number)
    }
}
