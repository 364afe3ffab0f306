//! Price ticks and contract lifecycle.

use super::core::Exchange;
use super::results::{EngineError, TickResult};
use crate::events::{BookEvent, BalanceReason, EventPayload, NetworkEvent};
use crate::types::{ContractId, Price, Quote, Timestamp};
use rust_decimal::Decimal;

impl Exchange {
    /// Apply one oracle tick to every book, then settle whatever it resolved.
    pub fn tick(&mut self, price: Price, timestamp: Timestamp) -> Result<TickResult, EngineError> {
        if !self.bootstrapped {
            return Err(EngineError::NotBootstrapped);
        }

        self.current_time = timestamp;
        self.last_price = Some(price);

        let outcome = self.network.on_tick(price, timestamp)?;
        let mut result = TickResult::new(price, timestamp, &outcome);

        for event in self.network.drain_events() {
            let resolution = match &event {
                NetworkEvent::Book {
                    event: BookEvent::ContractSettled(e),
                    ..
                } => Some((e.contract.id.clone(), e.return_multiplier)),
                NetworkEvent::Book {
                    event: BookEvent::ContractExpired(e),
                    ..
                } => Some((e.contract.id.clone(), Decimal::ZERO)),
                _ => None,
            };

            self.publish(EventPayload::Network(event));

            if let Some((contract_id, multiplier)) = resolution {
                let (count, paid) = self.settle_contract(&contract_id, multiplier);
                result.positions_settled += count;
                result.total_paid = result.total_paid.saturating_add(paid);
            }
        }

        if outcome.settled + outcome.expired > 0 {
            tracing::debug!(
                price = %price,
                settled = outcome.settled,
                expired = outcome.expired,
                paid = %result.total_paid,
                "tick resolved contracts"
            );
        }

        Ok(result)
    }

    // pays amount * multiplier to every open position on the contract. expiry passes zero.
    fn settle_contract(&mut self, contract_id: &ContractId, multiplier: Decimal) -> (usize, Quote) {
        let closed_at = self.current_time;
        let settled = self
            .positions
            .settle_positions_by_contract(contract_id, closed_at, |p| p.amount.saturating_mul(multiplier));

        let mut paid = Quote::zero();
        for position in &settled {
            let Some(payout) = position.payout.filter(Quote::is_positive) else {
                continue;
            };
            match self.ledger.credit(&position.user_id, payout, BalanceReason::Payout) {
                Ok(_) => paid = paid.saturating_add(payout),
                Err(e) => tracing::error!(
                    position = %position.position_id,
                    error = %e,
                    "payout credit failed"
                ),
            }
        }

        self.flush_positions();
        self.flush_ledger();
        (settled.len(), paid)
    }
}
