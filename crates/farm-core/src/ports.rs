//! External cost ports and their in-process defaults.
//!
//! The kernel never reaches into a ledger directly: systems are handed a
//! `CostPort` at construction and await `check_cost` then `apply_cost`, in
//! that order, before mutating local state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use contracts::{CostMap, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CostError {
    UnknownAccount(String),
    InsufficientBalance { account: String, kind: ResourceKind },
    InvalidAmount(i64),
    /// Ledger unreachable or timed out; reported before any local mutation.
    Unavailable(String),
}

impl fmt::Display for CostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAccount(account) => write!(f, "unknown account {account}"),
            Self::InsufficientBalance { account, kind } => {
                write!(f, "account {account} cannot cover {kind:?} cost")
            }
            Self::InvalidAmount(amount) => write!(f, "invalid cost amount {amount}"),
            Self::Unavailable(reason) => write!(f, "ledger unavailable: {reason}"),
        }
    }
}

impl std::error::Error for CostError {}

/// Resource debit boundary. `apply_cost` is only called after `check_cost`
/// succeeded for the same cost.
#[async_trait]
pub trait CostPort: Send + Sync {
    async fn check_cost(&self, user_id: &str, cost: &CostMap) -> Result<(), CostError>;
    async fn apply_cost(&self, user_id: &str, cost: &CostMap) -> Result<(), CostError>;
}

#[async_trait]
impl<P: CostPort + ?Sized> CostPort for std::sync::Arc<P> {
    async fn check_cost(&self, user_id: &str, cost: &CostMap) -> Result<(), CostError> {
        (**self).check_cost(user_id, cost).await
    }

    async fn apply_cost(&self, user_id: &str, cost: &CostMap) -> Result<(), CostError> {
        (**self).apply_cost(user_id, cost).await
    }
}

// ---------------------------------------------------------------------------
// In-memory wallet ledger
// ---------------------------------------------------------------------------

/// Default in-process ledger: per-user resource balances. Stands in for the
/// external wallet service and doubles as the credit target for sales.
#[derive(Debug, Default)]
pub struct WalletLedger {
    accounts: Mutex<BTreeMap<String, CostMap>>,
}

fn recover<'a, T>(
    guard: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    guard.unwrap_or_else(PoisonError::into_inner)
}

impl WalletLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all balances, used when a session restores from a snapshot.
    pub fn adopt(&self, balances: BTreeMap<String, CostMap>) {
        *recover(self.accounts.lock()) = balances;
    }

    pub fn snapshot(&self) -> BTreeMap<String, CostMap> {
        recover(self.accounts.lock()).clone()
    }

    pub fn balance(&self, user_id: &str) -> CostMap {
        recover(self.accounts.lock())
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn credit(&self, user_id: &str, kind: ResourceKind, amount: i64) -> Result<(), CostError> {
        if amount <= 0 {
            return Err(CostError::InvalidAmount(amount));
        }
        let mut accounts = recover(self.accounts.lock());
        let balance = accounts.entry(user_id.to_string()).or_default();
        *balance.entry(kind).or_insert(0) += amount;
        Ok(())
    }

    fn check(&self, user_id: &str, cost: &CostMap) -> Result<(), CostError> {
        let accounts = recover(self.accounts.lock());
        let balance = accounts
            .get(user_id)
            .ok_or_else(|| CostError::UnknownAccount(user_id.to_string()))?;
        for (kind, amount) in cost {
            if *amount < 0 {
                return Err(CostError::InvalidAmount(*amount));
            }
            if balance.get(kind).copied().unwrap_or(0) < *amount {
                return Err(CostError::InsufficientBalance {
                    account: user_id.to_string(),
                    kind: *kind,
                });
            }
        }
        Ok(())
    }

    fn debit(&self, user_id: &str, cost: &CostMap) -> Result<(), CostError> {
        let mut accounts = recover(self.accounts.lock());
        let balance = accounts
            .get(user_id)
            .ok_or_else(|| CostError::UnknownAccount(user_id.to_string()))?;
        for (kind, amount) in cost {
            if *amount < 0 {
                return Err(CostError::InvalidAmount(*amount));
            }
            if balance.get(kind).copied().unwrap_or(0) < *amount {
                return Err(CostError::InsufficientBalance {
                    account: user_id.to_string(),
                    kind: *kind,
                });
            }
        }
        let balance = accounts.entry(user_id.to_string()).or_default();
        for (kind, amount) in cost {
            *balance.entry(*kind).or_insert(0) -= amount;
        }
        Ok(())
    }
}

#[async_trait]
impl CostPort for WalletLedger {
    async fn check_cost(&self, user_id: &str, cost: &CostMap) -> Result<(), CostError> {
        self.check(user_id, cost)
    }

    async fn apply_cost(&self, user_id: &str, cost: &CostMap) -> Result<(), CostError> {
        self.debit(user_id, cost)
    }
}

// ---------------------------------------------------------------------------
// Timeout decorator
// ---------------------------------------------------------------------------

/// Bounds every call to the wrapped port; a timeout surfaces as
/// `CostError::Unavailable`, never as a crash of the drain loop.
pub struct BoundedCostPort<P> {
    inner: P,
    timeout: Duration,
}

impl<P> BoundedCostPort<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<P: CostPort> CostPort for BoundedCostPort<P> {
    async fn check_cost(&self, user_id: &str, cost: &CostMap) -> Result<(), CostError> {
        match tokio::time::timeout(self.timeout, self.inner.check_cost(user_id, cost)).await {
            Ok(result) => result,
            Err(_) => Err(CostError::Unavailable("cost check timed out".to_string())),
        }
    }

    async fn apply_cost(&self, user_id: &str, cost: &CostMap) -> Result<(), CostError> {
        match tokio::time::timeout(self.timeout, self.inner.apply_cost(user_id, cost)).await {
            Ok(result) => result,
            Err(_) => Err(CostError::Unavailable("cost apply timed out".to_string())),
        }
    }
}
