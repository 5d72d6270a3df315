//! Mutable account state used while executing one block.

use shared_types::trie::{commit_accounts, StateCommitment};
use shared_types::{Account, Address, Hash, U256};
use std::collections::BTreeMap;

/// Private, in-memory account state derived from a committed root.
///
/// Every insert works on its own copy; nothing is visible to readers until
/// the resulting commitment is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldState {
    accounts: BTreeMap<Address, Account>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts(accounts: BTreeMap<Address, Account>) -> Self {
        Self { accounts }
    }

    /// The account at `address`, or an empty one.
    pub fn account(&self, address: &Address) -> Account {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> U256 {
        self.account(address).balance
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.account(address).nonce
    }

    pub fn set_account(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, account);
    }

    /// Credit `amount`. Returns `false` on overflow, leaving the balance unchanged.
    pub fn add_balance(&mut self, address: &Address, amount: U256) -> bool {
        let entry = self.accounts.entry(*address).or_default();
        match entry.balance.checked_add(amount) {
            Some(balance) => {
                entry.balance = balance;
                true
            }
            None => false,
        }
    }

    /// Debit `amount`. Returns `false` if the balance is too low.
    pub fn sub_balance(&mut self, address: &Address, amount: U256) -> bool {
        let entry = self.accounts.entry(*address).or_default();
        match entry.balance.checked_sub(amount) {
            Some(balance) => {
                entry.balance = balance;
                true
            }
            None => false,
        }
    }

    pub fn increment_nonce(&mut self, address: &Address) {
        let entry = self.accounts.entry(*address).or_default();
        entry.nonce = entry.nonce.saturating_add(1);
    }

    pub fn accounts(&self) -> &BTreeMap<Address, Account> {
        &self.accounts
    }

    /// Trie commitment of the current accounts.
    pub fn commit(&self) -> StateCommitment {
        commit_accounts(&self.accounts)
    }

    pub fn root(&self) -> Hash {
        self.commit().root
    }
}
