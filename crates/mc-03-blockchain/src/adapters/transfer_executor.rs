//! Reference execution engine: value transfers with gas accounting.

use crate::domain::{ExecutionError, WorldState};
use crate::ports::{BlockContext, ExecutionEngine, TxContext};
use shared_types::{keccak256, Address, Log, Receipt, SenderRecovery, Transaction, U256};
use std::sync::Arc;

/// Executes plain value transfers.
///
/// - the sender pays `gas_limit * gas_price` up front and is refunded unused gas
/// - gas used is the intrinsic gas
/// - fees for gas used go to the block coinbase
/// - a non-empty payload emits one log at the recipient
/// - contract creation (`to = None`) credits a derived address
pub struct TransferExecutor {
    recovery: Arc<dyn SenderRecovery>,
}

impl TransferExecutor {
    pub fn new(recovery: Arc<dyn SenderRecovery>) -> Self {
        Self { recovery }
    }
}

/// Address credited by a creation transaction.
pub fn created_address(sender: &Address, nonce: u64) -> Address {
    let mut preimage = Vec::with_capacity(28);
    preimage.extend_from_slice(sender);
    preimage.extend_from_slice(&nonce.to_be_bytes());
    let hash = keccak256(&preimage);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

// A failed transfer leaves `state` partly applied; callers discard it.
fn credit(state: &mut WorldState, address: &Address, amount: U256) -> Result<(), ExecutionError> {
    if state.add_balance(address, amount) {
        Ok(())
    } else {
        Err(ExecutionError::BalanceOverflow(*address))
    }
}

fn debit(
    state: &mut WorldState,
    address: &Address,
    amount: U256,
    balance: U256,
    cost: U256,
) -> Result<(), ExecutionError> {
    if state.sub_balance(address, amount) {
        Ok(())
    } else {
        Err(ExecutionError::InsufficientFunds { balance, cost })
    }
}

impl ExecutionEngine for TransferExecutor {
    fn apply_transaction(
        &self,
        block: &BlockContext,
        tx_ctx: &TxContext,
        state: &mut WorldState,
        tx: &Transaction,
    ) -> Result<Receipt, ExecutionError> {
        let sender = self.recovery.recover_sender(tx)?;

        let expected = state.nonce(&sender);
        if tx.nonce != expected {
            return Err(ExecutionError::NonceMismatch {
                expected,
                got: tx.nonce,
            });
        }

        let intrinsic = tx.intrinsic_gas();
        if intrinsic > tx.gas_limit {
            return Err(ExecutionError::IntrinsicGas {
                needed: intrinsic,
                limit: tx.gas_limit,
            });
        }
        if tx_ctx.gas_used_before.saturating_add(tx.gas_limit) > block.gas_limit {
            return Err(ExecutionError::GasLimitReached);
        }

        let balance = state.balance(&sender);
        let cost = tx.cost();
        if balance < cost {
            return Err(ExecutionError::InsufficientFunds { balance, cost });
        }

        // Buy gas, bump nonce, move value.
        let upfront = tx.gas_price.saturating_mul(U256::from(tx.gas_limit));
        debit(state, &sender, upfront, balance, cost)?;
        state.increment_nonce(&sender);

        let recipient = tx.to.unwrap_or_else(|| created_address(&sender, tx.nonce));
        debit(state, &sender, tx.value, balance, cost)?;
        credit(state, &recipient, tx.value)?;

        let gas_used = intrinsic;
        let refund = tx.gas_price.saturating_mul(U256::from(tx.gas_limit - gas_used));
        credit(state, &sender, refund)?;
        credit(
            state,
            &block.coinbase,
            tx.gas_price.saturating_mul(U256::from(gas_used)),
        )?;

        let logs = if tx.data.is_empty() {
            Vec::new()
        } else {
            vec![Log {
                address: recipient,
                topics: vec![keccak256(&tx.data)],
                data: tx.data.clone(),
                block_number: block.number,
                tx_hash: tx_ctx.hash,
                tx_index: tx_ctx.index,
                ..Default::default()
            }]
        };

        Ok(Receipt {
            success: true,
            gas_used,
            cumulative_gas_used: tx_ctx.gas_used_before + gas_used,
            logs,
        })
    }
}
