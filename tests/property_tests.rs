//! Property-based tests for the orderbook and blueprints.
//!
//! These tests verify the grid invariants hold under random tick paths.

use ephemeral_clearing::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;

const TF: Timeframe = Timeframe(1000);

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (9_000i64..11_000i64).prop_map(|x| Decimal::new(x, 2)) // $90 to $110
}

fn step_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![
        8 => 0i64..1_500i64, // normal cadence
        1 => 1_500i64..30_000i64, // feed gap
    ]
}

fn tick_path() -> impl Strategy<Value = Vec<(i64, Decimal)>> {
    proptest::collection::vec((step_strategy(), price_strategy()), 1..60)
}

fn range_book(columns: usize) -> EphemeralOrderbook {
    let blueprint = RangeBlueprint::new(
        ProductId::range(),
        TF,
        RangeParams {
            total_columns: columns,
            rows_above: 3,
            rows_below: 3,
            ..Default::default()
        },
    );
    let mut book = EphemeralOrderbook::new(Arc::new(blueprint));
    book.bootstrap(Price::new_unchecked(dec!(100)), Timestamp::from_millis(0))
        .unwrap();
    book
}

fn directional_book() -> EphemeralOrderbook {
    let blueprint = DirectionalBlueprint::new(ProductId::directional(), TF, DirectionalParams::default());
    let mut book = EphemeralOrderbook::new(Arc::new(blueprint));
    book.bootstrap(Price::new_unchecked(dec!(100)), Timestamp::from_millis(0))
        .unwrap();
    book
}

// stake on every contract whose window is still ahead, so every resolution path is live
fn stake_everything(book: &mut EphemeralOrderbook, now: Timestamp) {
    let user = UserId::new("staker");
    let ids: Vec<ContractId> = book
        .active_contracts()
        .into_values()
        .filter(|c| c.accepts_stake_at(now))
        .map(|c| c.id)
        .collect();
    for id in ids {
        book.place_stake(&id, &user, Quote::new(dec!(1)), now).unwrap();
    }
}

fn resolved_ids(events: &[BookEvent]) -> Vec<ContractId> {
    events
        .iter()
        .filter_map(|e| match e {
            BookEvent::ContractSettled(s) => Some(s.contract.id.clone()),
            BookEvent::ContractExpired(x) => Some(x.contract.id.clone()),
            _ => None,
        })
        .collect()
}

proptest! {
    /// The book always holds exactly `total_columns` contiguous columns.
    #[test]
    fn window_size_is_constant(
        columns in 2usize..12,
        path in tick_path(),
    ) {
        let mut book = range_book(columns);
        let mut now = Timestamp::from_millis(0);

        for (step, price) in path {
            now = now.plus_millis(step);
            book.on_tick(Price::new_unchecked(price), now).unwrap();

            let snapshot = book.snapshot();
            prop_assert_eq!(snapshot.columns.len(), columns);
            prop_assert_eq!(snapshot.columns[0].index, book.current_column());
            prop_assert_eq!(snapshot.columns[0].window.start, book.start_time());
            for pair in snapshot.columns.windows(2) {
                prop_assert_eq!(pair[1].index, pair[0].index + 1);
                prop_assert_eq!(pair[1].window.start, pair[0].window.end);
            }

            // the current column is the one whose window holds `now`
            prop_assert!(snapshot.columns[0].window.contains(now));
        }
    }

    /// A contract is settled or expired at most once, and never comes back.
    #[test]
    fn contracts_resolve_at_most_once(
        path in tick_path(),
        directional in any::<bool>(),
    ) {
        let mut book = if directional { directional_book() } else { range_book(6) };
        let mut now = Timestamp::from_millis(0);
        let mut resolved: HashSet<ContractId> = HashSet::new();
        book.drain_events();

        for (step, price) in path {
            stake_everything(&mut book, now);
            now = now.plus_millis(step);
            book.on_tick(Price::new_unchecked(price), now).unwrap();

            for id in resolved_ids(&book.drain_events()) {
                prop_assert!(resolved.insert(id.clone()), "{} resolved twice", id);
            }
            for id in book.active_contracts().keys() {
                prop_assert!(!resolved.contains(id), "{} resolved but still active", id);
            }
        }
    }

    /// Winning contracts are exercised only by a price inside their window.
    #[test]
    fn settlement_price_falls_in_window(path in tick_path()) {
        let mut book = range_book(5);
        let mut now = Timestamp::from_millis(0);
        book.drain_events();

        for (step, price) in path {
            stake_everything(&mut book, now);
            now = now.plus_millis(step);
            book.on_tick(Price::new_unchecked(price), now).unwrap();

            for event in book.drain_events() {
                if let BookEvent::ContractSettled(s) = event {
                    prop_assert!(s.contract.window.contains(s.price_point.timestamp));
                    prop_assert_eq!(s.contract.status, ContractStatus::Exercised);
                    match s.contract.shape {
                        ContractShape::Band { lower, upper } => {
                            prop_assert!(s.price_point.price >= lower && s.price_point.price <= upper);
                        }
                        ContractShape::Strike { .. } => prop_assert!(false, "strike in a range book"),
                    }
                    let paid: Decimal = s.settlements.iter().map(|x| x.payout.value()).sum();
                    prop_assert_eq!(paid, s.contract.total_volume.value() * s.return_multiplier);
                }
            }
        }
    }

    /// Range multipliers stay inside the configured band.
    #[test]
    fn range_multipliers_in_band(
        column in 0u64..10_000,
        row in 0usize..11,
        steps in 1u64..20,
    ) {
        let blueprint = RangeBlueprint::new(
            ProductId::range(),
            TF,
            RangeParams {
                multiplier_steps: steps,
                ..Default::default()
            },
        );
        let m = blueprint.multiplier_for(column, row);
        prop_assert!(m >= dec!(1.5) && m <= dec!(5));
        prop_assert_eq!(m, blueprint.multiplier_for(column, row));
    }

    /// The random walk never crosses its floor and only moves in cents.
    #[test]
    fn random_walk_respects_floor(
        seed in any::<u64>(),
        start in 1i64..10_000i64,
        vol in 1i64..500i64,
    ) {
        let mut oracle = RandomWalkOracle::new(PriceFeedParams {
            initial_price: Decimal::new(start, 2),
            volatility: Decimal::new(vol, 3),
            min_price: dec!(0.01),
            seed: Some(seed),
            ..Default::default()
        })
        .unwrap();

        for i in 0..100 {
            let p = oracle.next_tick(Timestamp::from_millis(i)).price.value();
            prop_assert!(p >= dec!(0.01));
            prop_assert_eq!(p, p.round_dp(2));
        }
    }
}

#[test]
fn directional_strikes_bracket_reference() {
    let book = directional_book();
    for contract in book.active_contracts().values() {
        match contract.shape {
            ContractShape::Strike {
                strike,
                direction: Direction::Up,
            } => assert!(strike.value() > dec!(100)),
            ContractShape::Strike {
                strike,
                direction: Direction::Down,
            } => assert!(strike.value() < dec!(100)),
            ContractShape::Band { .. } => panic!("band in a directional book"),
        }
    }
    assert_eq!(book.active_contracts().len(), 20);
}
