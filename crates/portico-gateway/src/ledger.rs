use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use portico_core::{GatewayError, Result};

/// Result of an idempotent debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Applied,
    AlreadyDebited,
}

/// The single source of truth for org credit balances. Implementations
/// serialize writes per organization; debits are idempotent on the
/// request id.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Non-binding affordability read; does not reserve.
    async fn precheck(&self, org: &str, estimated: f64) -> Result<()>;

    /// Debit once per request id. Concurrent debits for the same request
    /// collapse to one effect.
    async fn debit(&self, org: &str, request_id: &str, amount: f64) -> Result<DebitOutcome>;

    /// Undo a debit after a non-recoverable delivery failure. Idempotent,
    /// at-most-once.
    async fn refund(&self, org: &str, request_id: &str) -> Result<()>;

    async fn balance(&self, org: &str) -> Result<f64>;
}

struct Account {
    balance: f64,
    /// request id -> debited amount, for idempotency and refunds.
    debits: HashMap<String, f64>,
}

/// In-process ledger. Per-org serialization comes from one mutex per
/// account held across the whole read-modify-write.
pub struct InMemoryLedger {
    accounts: DashMap<String, Arc<Mutex<Account>>>,
}

impl InMemoryLedger {
    pub fn new(initial_credits: HashMap<String, f64>) -> Self {
        let accounts = DashMap::new();
        for (org, balance) in initial_credits {
            accounts.insert(
                org,
                Arc::new(Mutex::new(Account {
                    balance,
                    debits: HashMap::new(),
                })),
            );
        }
        Self { accounts }
    }

    fn account(&self, org: &str) -> Arc<Mutex<Account>> {
        self.accounts
            .entry(org.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Account {
                    balance: 0.0,
                    debits: HashMap::new(),
                }))
            })
            .clone()
    }
}

#[async_trait]
impl CreditLedger for InMemoryLedger {
    async fn precheck(&self, org: &str, estimated: f64) -> Result<()> {
        let account = self.account(org);
        let account = account.lock();
        if account.balance < estimated {
            return Err(GatewayError::InsufficientCredits {
                estimated,
                available: account.balance,
            });
        }
        Ok(())
    }

    async fn debit(&self, org: &str, request_id: &str, amount: f64) -> Result<DebitOutcome> {
        let account = self.account(org);
        let mut account = account.lock();
        if account.debits.contains_key(request_id) {
            return Ok(DebitOutcome::AlreadyDebited);
        }
        if account.balance < amount {
            return Err(GatewayError::InsufficientCredits {
                estimated: amount,
                available: account.balance,
            });
        }
        account.balance -= amount;
        account.debits.insert(request_id.to_string(), amount);
        Ok(DebitOutcome::Applied)
    }

    async fn refund(&self, org: &str, request_id: &str) -> Result<()> {
        let account = self.account(org);
        let mut account = account.lock();
        if let Some(amount) = account.debits.remove(request_id) {
            account.balance += amount;
        }
        Ok(())
    }

    async fn balance(&self, org: &str) -> Result<f64> {
        Ok(self.account(org).lock().balance)
    }
}
