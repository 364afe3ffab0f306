//! Market maker rounds.

use super::core::Exchange;
use super::results::EngineError;
use crate::liquidity::MakerRound;

impl Exchange {
    /// One quoting pass over every book.
    pub fn run_market_maker(&mut self) -> Result<MakerRound, EngineError> {
        if !self.bootstrapped {
            return Err(EngineError::NotBootstrapped);
        }
        let maker = self.maker.as_mut().ok_or(EngineError::NoMarketMaker)?;

        let round = maker.run_round(&self.registry, &mut self.network);
        self.flush_network();
        Ok(round)
    }
}

#[cfg(test)]
mod tests {
    use crate::blueprint::{ProductRegistry, RangeParams};
    use crate::engine::{EngineConfig, EngineError, Exchange};
    use crate::events::{EventPayload, NetworkEvent};
    use crate::ledger::LedgerParams;
    use crate::types::{Price, ProductId, Timeframe, Timestamp};
    use rust_decimal_macros::dec;

    fn exchange() -> Exchange {
        let mut registry = ProductRegistry::new();
        registry.register_range(&[Timeframe(2000)], RangeParams::default());
        Exchange::new(EngineConfig::default(), registry, LedgerParams::default())
    }

    #[test]
    fn needs_an_attached_maker() {
        let mut ex = exchange();
        ex.bootstrap(Price::new_unchecked(dec!(100)), Timestamp::from_millis(0)).unwrap();
        assert!(matches!(ex.run_market_maker(), Err(EngineError::NoMarketMaker)));
    }

    #[test]
    fn round_publishes_quote_events() {
        let mut ex = exchange();
        ex.attach_market_maker(crate::liquidity::MarketMaker::new(Default::default()))
            .unwrap();
        ex.bootstrap(Price::new_unchecked(dec!(100)), Timestamp::from_millis(0)).unwrap();

        let round = ex.run_market_maker().unwrap();
        assert_eq!(round.quotes_applied, 110);

        let applied = ex
            .events()
            .filter(|e| matches!(e.payload, EventPayload::Network(NetworkEvent::MakerQuoteApplied(_))))
            .count();
        assert_eq!(applied, 110);
        assert!(ex
            .contracts(&ProductId::range(), Timeframe(2000))
            .unwrap()
            .iter()
            .all(|c| c.maker_id.is_some()));
    }
}
