//! Order placement.
//!
//! Everything that can reject an order is checked before anything is written:
//! amount, product/timeframe, contract availability, maker quote, then the
//! collateral debit. The stake is recorded only after the debit succeeds, so a
//! rejected order leaves both the balance and the contract untouched. If the
//! stake still fails after the debit, the debit is refunded.

use super::core::Exchange;
use super::results::{OrderError, OrderReceipt};
use crate::api::OrderRequest;
use crate::events::{BalanceReason, EventPayload, OrderPlacedEvent};
use crate::ledger::LedgerError;
use crate::network::NetworkError;
use crate::orderbook::StakeError;
use crate::position::OpenPositionParams;
use crate::types::{ProductId, Quote};

const AMOUNT_TOO_LARGE: &str = "Amount too large";

impl Exchange {
    /// Place a stake on one contract, paying collateral up front.
    pub fn place_order(
        &mut self,
        product: &ProductId,
        request: &OrderRequest,
    ) -> Result<OrderReceipt, OrderError> {
        let result = self.execute_order(product, request);
        if let Err(e) = &result {
            tracing::debug!(
                user = %request.user_id,
                contract = %request.contract_id,
                code = ?e.code(),
                error = %e,
                "order rejected"
            );
        }
        result
    }

    fn execute_order(
        &mut self,
        product: &ProductId,
        request: &OrderRequest,
    ) -> Result<OrderReceipt, OrderError> {
        let now = self.current_time;
        let user_id = &request.user_id;

        if !request.amount.is_positive() {
            return Err(OrderError::Validation("Amount must be positive".to_string()));
        }
        if !self.ledger.contains(user_id) {
            return Err(OrderError::Validation(format!("Unknown user {user_id}")));
        }

        let blueprint = self
            .registry
            .get_blueprint(product, request.timeframe)
            .map_err(|e| OrderError::Validation(e.to_string()))?;

        let quote = {
            let contract = self
                .network
                .check_order(product, request, now)
                .map_err(|e| match e {
                    NetworkError::Stake(StakeError::VolumeOverflow { .. }) => {
                        OrderError::Validation(AMOUNT_TOO_LARGE.to_string())
                    }
                    other => OrderError::Unavailable {
                        contract_id: request.contract_id.clone(),
                        reason: other.to_string(),
                    },
                })?;
            contract.maker_quote.clone().ok_or_else(|| OrderError::Liquidity {
                contract_id: request.contract_id.clone(),
            })?
        };

        let collateral = blueprint
            .required_collateral(request.amount, &quote)
            .ok_or_else(|| OrderError::Validation(AMOUNT_TOO_LARGE.to_string()))?;
        let balance = self
            .ledger
            .debit(user_id, collateral, BalanceReason::Collateral)
            .map_err(|e| match e {
                LedgerError::InsufficientBalance {
                    requested, available, ..
                } => OrderError::Margin {
                    required: requested,
                    available,
                },
                other => OrderError::Internal(other.to_string()),
            })?;

        let contract = match self.network.place_order(product, request, now) {
            Ok(contract) => contract,
            Err(e) => return Err(self.refund_failed_stake(request, collateral, e)),
        };

        let position = self.positions.open_position(OpenPositionParams {
            user_id: user_id.clone(),
            contract_id: contract.id.clone(),
            amount: request.amount,
            collateral,
            product: product.clone(),
            timeframe: request.timeframe,
            opened_at: now,
        });

        self.flush_ledger();
        self.flush_network();
        self.flush_positions();

        let client_contract = blueprint.to_client_contract(&contract);
        self.publish(EventPayload::OrderPlaced(OrderPlacedEvent {
            user_id: user_id.clone(),
            product: product.clone(),
            timeframe: request.timeframe,
            balance,
            contract: client_contract.clone(),
            position: position.clone(),
            collateral,
        }));

        tracing::info!(
            user = %user_id,
            contract = %contract.id,
            amount = %request.amount,
            collateral = %collateral,
            "order placed"
        );

        Ok(OrderReceipt {
            user_id: user_id.clone(),
            product: product.clone(),
            timeframe: request.timeframe,
            balance,
            contract: client_contract,
            position,
            collateral,
        })
    }

    // the debit already happened; hand the collateral back and report the stake failure
    fn refund_failed_stake(&mut self, request: &OrderRequest, collateral: Quote, error: NetworkError) -> OrderError {
        let user_id = &request.user_id;
        tracing::error!(contract = %request.contract_id, error = %error, "stake failed after debit, refunding");
        if let Err(refund) = self.ledger.credit(user_id, collateral, BalanceReason::Refund) {
            tracing::error!(user = %user_id, error = %refund, "refund failed");
        }
        self.flush_ledger();
        OrderError::Internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::api::{ErrorCode, OrderRequest};
    use crate::blueprint::{ProductRegistry, RangeParams};
    use crate::contract::ContractShape;
    use crate::engine::{EngineConfig, Exchange, OrderError};
    use crate::events::{BalanceReason, EventPayload};
    use crate::network::NetworkError;
    use crate::orderbook::StakeError;
    use crate::ledger::LedgerParams;
    use crate::liquidity::{MakerParams, MarketMaker};
    use crate::types::{ContractId, Price, ProductId, Quote, Timeframe, Timestamp, UserId};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const TF: Timeframe = Timeframe(2000);

    fn exchange(starting: Decimal, collateral_per_unit: Decimal) -> Exchange {
        let mut registry = ProductRegistry::new();
        registry.register_range(
            &[TF],
            RangeParams {
                total_columns: 4,
                rows_above: 2,
                rows_below: 2,
                ..Default::default()
            },
        );
        let mut ex = Exchange::new(
            EngineConfig::default(),
            registry,
            LedgerParams {
                starting_balance: starting,
                house_initial: dec!(1_000_000),
            },
        );
        ex.attach_market_maker(MarketMaker::new(MakerParams {
            collateral_per_unit_min: collateral_per_unit,
            collateral_per_unit_max: collateral_per_unit,
            seed: Some(1),
            ..Default::default()
        }))
        .unwrap();
        ex.bootstrap(Price::new_unchecked(dec!(100)), Timestamp::from_millis(0)).unwrap();
        ex.initialize_user(&alice());
        ex
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    // band [99, 100] in column 1
    fn target(ex: &Exchange) -> ContractId {
        ex.network()
            .active_contracts(&ProductId::range(), TF)
            .unwrap()
            .into_values()
            .find(|c| {
                c.grid.column == 1
                    && matches!(c.shape, ContractShape::Band { lower, .. } if lower.value() == dec!(99))
            })
            .unwrap()
            .id
    }

    fn request(contract_id: ContractId, amount: Decimal) -> OrderRequest {
        OrderRequest {
            user_id: alice(),
            contract_id,
            amount: Quote::new(amount),
            timeframe: TF,
        }
    }

    fn run_maker(ex: &mut Exchange) {
        ex.run_market_maker().unwrap();
    }

    #[test]
    fn zero_amount_is_a_validation_error() {
        let mut ex = exchange(dec!(100), dec!(1));
        let id = target(&ex);
        let err = ex.place_order(&ProductId::range(), &request(id, dec!(0))).unwrap_err();
        assert_eq!(err, OrderError::Validation("Amount must be positive".to_string()));
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn unquoted_contract_has_no_liquidity() {
        let mut ex = exchange(dec!(100), dec!(1));
        let id = target(&ex);

        let err = ex.place_order(&ProductId::range(), &request(id.clone(), dec!(10))).unwrap_err();
        assert_eq!(err.to_string(), "No maker liquidity available");
        assert_eq!(ex.balance(&alice()).unwrap().value(), dec!(100));

        run_maker(&mut ex);
        let receipt = ex.place_order(&ProductId::range(), &request(id, dec!(10))).unwrap();
        assert_eq!(receipt.balance.value(), dec!(90));
        assert_eq!(receipt.collateral.value(), dec!(10));
        assert!(receipt.position.is_open());
    }

    #[test]
    fn insufficient_balance_is_a_margin_error_and_touches_nothing() {
        let mut ex = exchange(dec!(100), dec!(1));
        run_maker(&mut ex);
        let id = target(&ex);

        let err = ex.place_order(&ProductId::range(), &request(id.clone(), dec!(150))).unwrap_err();
        assert_eq!(err.to_string(), "Margin check failed");
        assert_eq!(err.code(), ErrorCode::MarginError);
        assert_eq!(ex.balance(&alice()).unwrap().value(), dec!(100));

        let contract = ex.network().contract_by_id(&ProductId::range(), TF, &id).unwrap();
        assert!(contract.total_volume.is_zero());
        assert!(ex.positions_for_user(&alice()).is_empty());
    }

    #[test]
    fn collateral_scales_with_quote() {
        let mut ex = exchange(dec!(100), dec!(1.5));
        run_maker(&mut ex);
        let id = target(&ex);

        let receipt = ex.place_order(&ProductId::range(), &request(id, dec!(10))).unwrap();
        assert_eq!(receipt.collateral.value(), dec!(15));
        assert_eq!(receipt.balance.value(), dec!(85));
        assert_eq!(receipt.position.amount.value(), dec!(10));
    }

    #[test]
    fn oversized_amount_is_rejected_and_engine_keeps_trading() {
        let mut ex = exchange(dec!(100), dec!(1.2));
        run_maker(&mut ex);
        let id = target(&ex);

        for amount in [Decimal::MAX, Decimal::MAX / dec!(1.1)] {
            let err = ex.place_order(&ProductId::range(), &request(id.clone(), amount)).unwrap_err();
            assert_eq!(err, OrderError::Validation("Amount too large".to_string()));
            assert_eq!(err.code(), ErrorCode::ValidationError);
        }
        assert_eq!(ex.balance(&alice()).unwrap().value(), dec!(100));
        assert!(ex.positions_for_user(&alice()).is_empty());

        let receipt = ex.place_order(&ProductId::range(), &request(id, dec!(10))).unwrap();
        assert_eq!(receipt.collateral.value(), dec!(12));
        assert_eq!(receipt.balance.value(), dec!(88));
        assert!(ex.ledger().is_conserved());
    }

    #[test]
    fn failed_stake_after_debit_is_refunded() {
        let mut ex = exchange(dec!(100), dec!(1));
        run_maker(&mut ex);
        let id = target(&ex);
        let collateral = Quote::new(dec!(10));
        ex.ledger
            .debit(&alice(), collateral, BalanceReason::Collateral)
            .unwrap();
        ex.flush_ledger();
        let mut rx = ex.subscribe();

        let err = ex.refund_failed_stake(
            &request(id.clone(), dec!(10)),
            collateral,
            NetworkError::Stake(StakeError::ContractNotFound(id)),
        );
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert_eq!(ex.balance(&alice()).unwrap().value(), dec!(100));
        assert!(ex.ledger().is_conserved());

        let reasons: Vec<BalanceReason> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e.payload {
                EventPayload::BalanceChanged(b) => Some(b.reason),
                _ => None,
            })
            .collect();
        assert_eq!(reasons, vec![BalanceReason::Refund]);
    }

    #[test]
    fn started_window_is_unavailable() {
        let mut ex = exchange(dec!(100), dec!(1));
        run_maker(&mut ex);
        let id = target(&ex);

        ex.set_time(Timestamp::from_millis(2000));
        let err = ex.place_order(&ProductId::range(), &request(id, dec!(10))).unwrap_err();
        assert_eq!(err.to_string(), "Contract not available");
        assert_eq!(err.code(), ErrorCode::UnavailableError);
    }

    #[test]
    fn unsupported_timeframe_and_unknown_user() {
        let mut ex = exchange(dec!(100), dec!(1));
        let id = target(&ex);

        let mut req = request(id.clone(), dec!(10));
        req.timeframe = Timeframe(7000);
        let err = ex.place_order(&ProductId::range(), &req).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let mut req = request(id, dec!(10));
        req.user_id = UserId::new("ghost");
        let err = ex.place_order(&ProductId::range(), &req).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn accepted_order_emits_in_order() {
        let mut ex = exchange(dec!(100), dec!(1));
        run_maker(&mut ex);
        let id = target(&ex);
        let mut rx = ex.subscribe();

        ex.place_order(&ProductId::range(), &request(id, dec!(10))).unwrap();
        let names: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.payload.name())
            .collect();
        assert_eq!(names, vec!["balance_changed", "position_opened", "order_placed"]);
    }
}
