use juniper::graphql_object;

use crate::{
    api::{Context, common::DateTime, err::ApiResult},
    ledger::{LedgerDecimal, LedgerError, LedgerTimestamp, Record},
    prelude::*,
};


/// Name of the ledger table all transactions are stored in.
pub(crate) const TABLE: &str = "transactions";

mod field {
    pub(crate) const ACCOUNT_NUMBER: &str = "account_number";
    pub(crate) const TIMESTAMP: &str = "timestamp";
    pub(crate) const AMOUNT: &str = "amount";
    pub(crate) const DESCRIPTION: &str = "description";
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Transaction {
    pub(crate) account_number: String,
    pub(crate) timestamp: LedgerTimestamp,
    pub(crate) amount: LedgerDecimal,
    pub(crate) description: String,
}

/// Arguments of `logTransaction`.
pub(crate) struct NewTransaction {
    pub(crate) account_number: String,
    pub(crate) amount: f64,
    pub(crate) description: String,
}

/// A single entry of the ledger. Once logged, it is never changed.
#[graphql_object(Context = Context)]
impl Transaction {
    fn account_number(&self) -> &str {
        &self.account_number
    }

    /// When the transaction was logged, in the local time of the server that
    /// logged it.
    fn timestamp(&self) -> DateTime {
        DateTime(*self.timestamp.as_datetime())
    }

    /// The amount in currency units. Positive for credits, negative for
    /// debits.
    fn amount(&self) -> f64 {
        self.amount.to_f64()
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl Transaction {
    /// Creates a transaction timestamped with the current time. Nothing is
    /// written to the ledger.
    pub(crate) fn new(account_number: String, amount: LedgerDecimal, description: String) -> Self {
        Self {
            account_number,
            timestamp: LedgerTimestamp::now(),
            amount,
            description,
        }
    }

    pub(crate) async fn load_for_account(
        account_number: &str,
        context: &Context,
    ) -> ApiResult<Vec<Self>> {
        let mut session = context.ledger.connect().await?;
        let records = session.select(TABLE, field::ACCOUNT_NUMBER, account_number).await?;

        records.iter()
            .map(Self::from_record)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    pub(crate) async fn log(params: NewTransaction, context: &Context) -> ApiResult<Self> {
        let transaction = Self::new(
            params.account_number,
            LedgerDecimal::from_currency(params.amount)?,
            params.description,
        );
        Self::append(&[&transaction], context).await?;
        debug!(
            "Logged transaction of {} for account '{}'",
            transaction.amount,
            transaction.account_number,
        );

        Ok(transaction)
    }

    /// Writes all given transactions to the ledger with one statement.
    pub(crate) async fn append(transactions: &[&Self], context: &Context) -> ApiResult<()> {
        let records = transactions.iter().map(|t| t.to_record()).collect::<Vec<_>>();
        let mut session = context.ledger.connect().await?;
        session.insert(TABLE, &records).await?;
        Ok(())
    }

    pub(crate) fn to_record(&self) -> Record {
        Record::new()
            .with(field::ACCOUNT_NUMBER, self.account_number.clone())
            .with(field::TIMESTAMP, self.timestamp)
            .with(field::AMOUNT, self.amount)
            .with(field::DESCRIPTION, self.description.clone())
    }

    pub(crate) fn from_record(record: &Record) -> Result<Self, LedgerError> {
        Ok(Self {
            account_number: record.string(field::ACCOUNT_NUMBER)?,
            timestamp: record.timestamp(field::TIMESTAMP)?,
            amount: record.decimal(field::AMOUNT)?,
            description: record.string(field::DESCRIPTION)?,
        })
    }
}
