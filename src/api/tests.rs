use std::{collections::HashSet, sync::Arc};
use chrono::DateTime;
use serde_json::{json, Value as Json};

use crate::ledger::{fake::FakeLedger, LedgerDecimal, LedgerTimestamp, Record};
use super::{Context, model::transaction::{Transaction, TABLE}, root_node};


/// Executes `query` against a fresh root node backed by `ledger`. Returns the
/// data as JSON and the messages of all field errors.
async fn execute(ledger: &FakeLedger, query: &str) -> (Json, Vec<String>) {
    let root = root_node();
    let context = Context { ledger: Arc::new(ledger.clone()) };
    let (value, errors) = juniper::execute(query, None, &root, &juniper::Variables::new(), &context)
        .await
        .expect("invalid GraphQL request");

    let errors = errors.iter().map(|e| e.error().message().to_owned()).collect();
    (serde_json::to_value(&value).unwrap(), errors)
}

fn stored_transactions(ledger: &FakeLedger) -> Vec<Transaction> {
    ledger.records(TABLE).iter().map(|r| Transaction::from_record(r).unwrap()).collect()
}

fn push_transaction(ledger: &FakeLedger, account: &str, cents: i64, description: &str) {
    let timestamp = DateTime::parse_from_rfc3339("2024-03-01T09:30:00.250+01:00").unwrap();
    let transaction = Transaction {
        account_number: account.into(),
        timestamp: LedgerTimestamp::new(timestamp),
        amount: LedgerDecimal::new(cents, LedgerDecimal::CURRENCY_EXPONENT),
        description: description.into(),
    };
    ledger.push(TABLE, transaction.to_record());
}


#[tokio::test]
async fn hello_still_answers() {
    let ledger = FakeLedger::new();
    let (data, errors) = execute(&ledger, "{ hello }").await;
    assert!(errors.is_empty());
    assert_eq!(data, json!({ "hello": "Hello world!" }));
    assert_eq!(ledger.connects(), 0);
}

#[tokio::test]
async fn log_transaction_stores_cents() {
    let ledger = FakeLedger::new();
    let (data, errors) = execute(&ledger, r#"mutation {
        logTransaction(accountNumber: "A1", amount: 50.0, description: "deposit") {
            accountNumber amount description timestamp
        }
    }"#).await;

    assert!(errors.is_empty(), "{errors:?}");
    let logged = &data["logTransaction"];
    assert_eq!(logged["accountNumber"], "A1");
    assert_eq!(logged["amount"], json!(50.0));
    assert_eq!(logged["description"], "deposit");
    let timestamp = logged["timestamp"].as_str().unwrap();
    assert!(DateTime::parse_from_rfc3339(timestamp).is_ok(), "bad timestamp {timestamp}");

    let stored = stored_transactions(&ledger);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].account_number, "A1");
    assert_eq!(stored[0].amount, LedgerDecimal::new(5000, -2));
    assert_eq!(stored[0].description, "deposit");

    assert_eq!(ledger.connects(), 1);
    assert_eq!(ledger.releases(), 1);
}

#[tokio::test]
async fn log_transaction_rounds_to_cents() {
    let ledger = FakeLedger::new();
    let (data, errors) = execute(&ledger, r#"mutation {
        logTransaction(accountNumber: "A1", amount: 12.345, description: "odd") { amount }
    }"#).await;

    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(data["logTransaction"]["amount"], json!(12.35));
    assert_eq!(stored_transactions(&ledger)[0].amount.coefficient(), 1235);
}

#[tokio::test]
async fn transfer_writes_debit_and_credit() {
    let ledger = FakeLedger::new();
    let (data, errors) = execute(&ledger, r#"mutation {
        transfer(fromAccount: "A1", toAccount: "B2", amount: 20.0, description: "rent") {
            debit { accountNumber amount description }
            credit { accountNumber amount description }
        }
    }"#).await;

    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(data["transfer"], json!({
        "debit": { "accountNumber": "A1", "amount": -20.0, "description": "rent" },
        "credit": { "accountNumber": "B2", "amount": 20.0, "description": "rent" },
    }));

    let stored = stored_transactions(&ledger);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].account_number, "A1");
    assert_eq!(stored[0].amount.coefficient(), -2000);
    assert_eq!(stored[1].account_number, "B2");
    assert_eq!(stored[1].amount.coefficient(), 2000);

    // Both records are written within one session.
    assert_eq!(ledger.connects(), 1);
    assert_eq!(ledger.releases(), 1);
}

#[tokio::test]
async fn logged_transaction_shows_up_in_account() {
    let ledger = FakeLedger::new();
    let (_, errors) = execute(&ledger, r#"mutation {
        logTransaction(accountNumber: "A1", amount: 50, description: "deposit") { amount }
    }"#).await;
    assert!(errors.is_empty(), "{errors:?}");

    let (data, errors) = execute(&ledger, r#"{
        account(accountNumber: "A1") { accountNumber transactions { amount description } }
    }"#).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(data, json!({
        "account": {
            "accountNumber": "A1",
            "transactions": [{ "amount": 50.0, "description": "deposit" }],
        },
    }));
}

#[tokio::test]
async fn unknown_account_has_no_transactions() {
    let ledger = FakeLedger::new();
    push_transaction(&ledger, "A1", 100, "other account");

    let (data, errors) = execute(&ledger, r#"{
        account(accountNumber: "nobody") { accountNumber transactions { amount } }
    }"#).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(data, json!({
        "account": { "accountNumber": "nobody", "transactions": [] },
    }));
}

#[tokio::test]
async fn account_without_transactions_field_does_not_connect() {
    let ledger = FakeLedger::new().unreachable();
    let (data, errors) = execute(&ledger, r#"{ account(accountNumber: "A1") { accountNumber } }"#).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(data, json!({ "account": { "accountNumber": "A1" } }));
}

#[tokio::test]
async fn reads_are_idempotent() {
    let ledger = FakeLedger::new();
    push_transaction(&ledger, "A1", 5000, "deposit");
    push_transaction(&ledger, "A1", -1999, "groceries");
    push_transaction(&ledger, "B2", 7, "not mine");

    let query = r#"{
        account(accountNumber: "A1") { transactions { accountNumber timestamp amount description } }
    }"#;
    let as_set = |data: &Json| -> HashSet<String> {
        data["account"]["transactions"].as_array().unwrap()
            .iter()
            .map(|t| t.to_string())
            .collect()
    };

    let (first, errors) = execute(&ledger, query).await;
    assert!(errors.is_empty(), "{errors:?}");
    let (second, _) = execute(&ledger, query).await;
    assert_eq!(as_set(&first).len(), 2);
    assert_eq!(as_set(&first), as_set(&second));

    let amounts = first["account"]["transactions"].as_array().unwrap()
        .iter()
        .map(|t| t["amount"].as_f64().unwrap())
        .collect::<Vec<_>>();
    assert!(amounts.contains(&50.0));
    assert!(amounts.contains(&-19.99));

    assert_eq!(first["account"]["transactions"][0]["timestamp"], "2024-03-01T09:30:00.250+01:00");

    assert_eq!(ledger.connects(), 2);
    assert_eq!(ledger.releases(), 2);
}

#[tokio::test]
async fn timestamp_keeps_utc_offset() {
    let ledger = FakeLedger::new();
    push_transaction(&ledger, "A1", 100, "deposit");

    let (data, errors) = execute(&ledger, r#"{
        account(accountNumber: "A1") { transactions { timestamp } }
    }"#).await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(data, json!({
        "account": { "transactions": [{ "timestamp": "2024-03-01T09:30:00.250+01:00" }] },
    }));
}

#[tokio::test]
async fn logged_timestamp_has_local_offset() {
    let ledger = FakeLedger::new();
    let (data, errors) = execute(&ledger, r#"mutation {
        logTransaction(accountNumber: "A1", amount: 1, description: "x") { timestamp }
    }"#).await;
    assert!(errors.is_empty(), "{errors:?}");

    let returned = data["logTransaction"]["timestamp"].as_str().unwrap();
    let stored = stored_transactions(&ledger)[0].timestamp;
    assert_eq!(
        returned,
        stored.as_datetime().to_rfc3339_opts(chrono::SecondsFormat::Millis, false),
    );
}

#[tokio::test]
async fn unrepresentable_amounts_are_rejected() {
    let ledger = FakeLedger::new();
    for amount in ["1e20", "-1e20"] {
        let (data, errors) = execute(&ledger, &format!(r#"mutation {{
            logTransaction(accountNumber: "A1", amount: {amount}, description: "x") {{ amount }}
        }}"#)).await;
        assert_eq!(data, Json::Null);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Invalid input"), "{errors:?}");
    }

    let (data, errors) = execute(&ledger, r#"mutation {
        transfer(fromAccount: "A1", toAccount: "B2", amount: -1e300, description: "x") {
            debit { amount }
        }
    }"#).await;
    assert_eq!(data, Json::Null);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Invalid input"), "{errors:?}");

    // Rejected before a session is opened.
    assert!(ledger.records(TABLE).is_empty());
    assert_eq!(ledger.connects(), 0);
}

#[tokio::test]
async fn unreachable_ledger_is_a_field_error() {
    let ledger = FakeLedger::new().unreachable();
    let (data, errors) = execute(&ledger, r#"mutation {
        logTransaction(accountNumber: "A1", amount: 1, description: "x") { amount }
    }"#).await;

    assert_eq!(data, Json::Null);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Ledger unavailable"), "{errors:?}");
    assert_eq!(ledger.releases(), 0);
}

#[tokio::test]
async fn failing_statement_releases_session() {
    let ledger = FakeLedger::new().failing_statements();
    let (_, errors) = execute(&ledger, r#"mutation {
        transfer(fromAccount: "A1", toAccount: "B2", amount: 5, description: "x") {
            debit { amount }
        }
    }"#).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Ledger unavailable"), "{errors:?}");
    assert!(ledger.records(TABLE).is_empty());

    let (_, errors) = execute(&ledger, r#"{
        account(accountNumber: "A1") { transactions { amount } }
    }"#).await;
    assert_eq!(errors.len(), 1);

    assert_eq!(ledger.connects(), 2);
    assert_eq!(ledger.releases(), 2);
}

#[tokio::test]
async fn malformed_record_is_reported() {
    let ledger = FakeLedger::new();
    ledger.push(TABLE, Record::new()
        .with("account_number", "A1".to_owned())
        .with("amount", LedgerDecimal::new(100, -2))
        .with("description", "no timestamp".to_owned()));

    let (data, errors) = execute(&ledger, r#"{
        account(accountNumber: "A1") { transactions { amount } }
    }"#).await;
    assert_eq!(data, Json::Null);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("field 'timestamp' is missing"), "{errors:?}");
    assert_eq!(ledger.releases(), 1);
}

#[test]
fn schema_contains_all_types() {
    let sdl = root_node().as_sdl();
    assert!(sdl.contains("type Transaction {"));
    assert!(sdl.contains("type Transfer {"));
    assert!(sdl.contains("debit: Transaction!"));
    assert!(sdl.contains("transactions: [Transaction!]!"));
    assert!(sdl.contains("scalar DateTime"));
    assert!(sdl.contains("@deprecated"));
}
