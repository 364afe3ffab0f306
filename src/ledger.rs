//! Balance ledger.
//!
//! Per-user balances plus a house counter-balance that moves inversely: every credit
//! to a user is a debit of the house and every debit of a user is a credit to the house.
//! Seeding a new user is an external deposit and leaves the house alone, so
//! `sum(users) + house == seeded + house_initial` holds after any sequence of operations.

use crate::events::{BalanceChangeKind, BalanceChangedEvent, BalanceReason};
use crate::types::{Quote, UserId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerParams {
    /// Balance granted once to every new user.
    pub starting_balance: Decimal,
    /// Opening value of the house counter-balance.
    pub house_initial: Decimal,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            starting_balance: dec!(1000),
            house_initial: dec!(1_000_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: UserId,
    pub balance: Quote,
    pub total_credited: Quote,
    pub total_debited: Quote,
}

impl UserBalance {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Quote::zero(),
            total_credited: Quote::zero(),
            total_debited: Quote::zero(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub house: Quote,
    pub seeded_total: Quote,
    pub balances: BTreeMap<UserId, Quote>,
}

#[derive(Debug)]
pub struct BalanceLedger {
    params: LedgerParams,
    accounts: HashMap<UserId, UserBalance>,
    house: Quote,
    seeded_total: Quote,
    pending: Vec<BalanceChangedEvent>,
}

impl BalanceLedger {
    pub fn new(params: LedgerParams) -> Self {
        let house = Quote::new(params.house_initial);
        Self {
            params,
            accounts: HashMap::new(),
            house,
            seeded_total: Quote::zero(),
            pending: Vec::new(),
        }
    }

    /// Creates the user with the starting balance. returns false if it already existed.
    pub fn initialize_user(&mut self, user_id: &UserId) -> bool {
        if self.accounts.contains_key(user_id) {
            return false;
        }

        let seed = Quote::new(self.params.starting_balance);
        let mut account = UserBalance::new(user_id.clone());
        account.balance = seed;
        self.accounts.insert(user_id.clone(), account);
        self.seeded_total = self.seeded_total.add(seed);

        self.pending.push(BalanceChangedEvent {
            user_id: user_id.clone(),
            previous: Quote::zero(),
            balance: seed,
            change: seed,
            kind: BalanceChangeKind::Seed,
            reason: BalanceReason::InitialSeed,
        });

        tracing::debug!(user = %user_id, seed = %seed, "user initialized");
        true
    }

    pub fn credit(
        &mut self,
        user_id: &UserId,
        amount: Quote,
        reason: BalanceReason,
    ) -> Result<Quote, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.clone()))?;

        let overflow = || LedgerError::Overflow(user_id.clone());
        let balance = account.balance.checked_add(amount).ok_or_else(overflow)?;
        let total_credited = account.total_credited.checked_add(amount).ok_or_else(overflow)?;
        let house = self.house.checked_sub(amount).ok_or_else(overflow)?;

        let previous = account.balance;
        account.balance = balance;
        account.total_credited = total_credited;
        self.house = house;

        self.pending.push(BalanceChangedEvent {
            user_id: user_id.clone(),
            previous,
            balance,
            change: amount,
            kind: BalanceChangeKind::Credit,
            reason,
        });

        Ok(balance)
    }

    pub fn debit(
        &mut self,
        user_id: &UserId,
        amount: Quote,
        reason: BalanceReason,
    ) -> Result<Quote, LedgerError> {
        self.check_debit(user_id, amount)?;

        let account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.clone()))?;

        let overflow = || LedgerError::Overflow(user_id.clone());
        let total_debited = account.total_debited.checked_add(amount).ok_or_else(overflow)?;
        let house = self.house.checked_add(amount).ok_or_else(overflow)?;

        let previous = account.balance;
        account.balance = account.balance.sub(amount);
        account.total_debited = total_debited;
        let balance = account.balance;
        self.house = house;

        self.pending.push(BalanceChangedEvent {
            user_id: user_id.clone(),
            previous,
            balance,
            change: amount.negate(),
            kind: BalanceChangeKind::Debit,
            reason,
        });

        Ok(balance)
    }

    /// Runs every debit check without touching state.
    pub fn check_debit(&self, user_id: &UserId, amount: Quote) -> Result<(), LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let account = self
            .accounts
            .get(user_id)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.clone()))?;

        if amount > account.balance {
            return Err(LedgerError::InsufficientBalance {
                user_id: user_id.clone(),
                requested: amount,
                available: account.balance,
            });
        }
        Ok(())
    }

    pub fn balance(&self, user_id: &UserId) -> Option<Quote> {
        self.accounts.get(user_id).map(|a| a.balance)
    }

    pub fn account(&self, user_id: &UserId) -> Option<&UserBalance> {
        self.accounts.get(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.accounts.contains_key(user_id)
    }

    pub fn house_balance(&self) -> Quote {
        self.house
    }

    pub fn seeded_total(&self) -> Quote {
        self.seeded_total
    }

    pub fn total_user_balance(&self) -> Quote {
        self.accounts
            .values()
            .fold(Quote::zero(), |acc, a| acc.saturating_add(a.balance))
    }

    pub fn is_conserved(&self) -> bool {
        let lhs = self
            .accounts
            .values()
            .try_fold(self.house, |acc, a| acc.checked_add(a.balance));
        let rhs = self.seeded_total.checked_add(Quote::new(self.params.house_initial));
        matches!((lhs, rhs), (Some(l), Some(r)) if l == r)
    }

    pub fn drain_events(&mut self) -> Vec<BalanceChangedEvent> {
        std::mem::take(&mut self.pending)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            house: self.house,
            seeded_total: self.seeded_total,
            balances: self
                .accounts
                .iter()
                .map(|(id, a)| (id.clone(), a.balance))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Quote),

    #[error("Insufficient balance for {user_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        user_id: UserId,
        requested: Quote,
        available: Quote,
    },

    #[error("Unknown user {0}")]
    UserNotFound(UserId),

    #[error("Balance overflow for {0}")]
    Overflow(UserId),
}
