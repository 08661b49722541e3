use juniper::graphql_object;

use crate::{
    api::{Context, err::ApiResult},
    ledger::{LedgerDecimal, LedgerError},
    prelude::*,
};
use super::transaction::Transaction;


/// Arguments of `transfer`.
pub(crate) struct NewTransfer {
    pub(crate) from_account: String,
    pub(crate) to_account: String,
    pub(crate) amount: f64,
    pub(crate) description: String,
}

/// The two transactions making up a transfer.
pub(crate) struct Transfer {
    debit: Transaction,
    credit: Transaction,
}

/// Result of a transfer: the debit of the source account and the credit of
/// the target account. Both amounts have the same magnitude.
#[graphql_object(Context = Context)]
impl Transfer {
    fn debit(&self) -> &Transaction {
        &self.debit
    }

    fn credit(&self) -> &Transaction {
        &self.credit
    }
}

impl Transfer {
    pub(crate) async fn perform(params: NewTransfer, context: &Context) -> ApiResult<Self> {
        let transfer = Self::new(params)?;
        Transaction::append(&[&transfer.debit, &transfer.credit], context).await?;
        debug!(
            "Transferred {} from '{}' to '{}'",
            transfer.credit.amount,
            transfer.debit.account_number,
            transfer.credit.account_number,
        );

        Ok(transfer)
    }

    fn new(params: NewTransfer) -> Result<Self, LedgerError> {
        // Negating after rounding, so both sides always cancel out exactly.
        let amount = LedgerDecimal::from_currency(params.amount)?;
        let debit_amount = amount.checked_neg().ok_or_else(|| LedgerError::OutOfRange(
            format!("transfer amount {amount} cannot be debited"),
        ))?;

        Ok(Self {
            debit: Transaction::new(params.from_account, debit_amount, params.description.clone()),
            credit: Transaction::new(params.to_account, amount, params.description),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn params(amount: f64) -> NewTransfer {
        NewTransfer {
            from_account: "A1".into(),
            to_account: "B2".into(),
            amount,
            description: "shared dinner".into(),
        }
    }

    #[test]
    fn debit_and_credit_cancel_out() {
        for amount in [20.0, 0.125, 1.005, -3.3, 0.0, -1e16] {
            let transfer = Transfer::new(params(amount)).unwrap();
            assert_eq!(
                transfer.debit.amount.coefficient() + transfer.credit.amount.coefficient(),
                0,
            );
            assert_eq!(transfer.debit.account_number, "A1");
            assert_eq!(transfer.credit.account_number, "B2");
            assert_eq!(transfer.debit.description, transfer.credit.description);
        }
    }

    #[test]
    fn unrepresentable_amount_is_rejected() {
        for amount in [-1e300, 1e20, f64::INFINITY] {
            let err = Transfer::new(params(amount)).err().unwrap();
            assert!(matches!(err, LedgerError::OutOfRange(_)), "{amount}: {err:?}");
        }
    }
}
