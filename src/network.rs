// 6.0: orderbook network. one ephemeral orderbook per registered (product, timeframe).
// routes orders and ticks, and re-tags every book event with its pair so a single
// stream can carry all books.

use crate::api::OrderRequest;
use crate::blueprint::ProductRegistry;
use crate::contract::{ClientContract, Contract, MakerQuote};
use crate::events::{MakerQuoteAppliedEvent, NetworkEvent};
use crate::orderbook::{BookError, BookSnapshot, EphemeralOrderbook, StakeError, TickOutcome};
use crate::types::{ContractId, Price, ProductId, Timeframe, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;

type BookKey = (ProductId, Timeframe);

#[derive(Debug, Default)]
pub struct OrderbookNetwork {
    books: BTreeMap<BookKey, EphemeralOrderbook>,
    pending: Vec<NetworkEvent>,
}

impl OrderbookNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and bootstraps one book for every registered pair.
    pub fn bootstrap(
        &mut self,
        registry: &ProductRegistry,
        price: Price,
        now: Timestamp,
    ) -> Result<usize, NetworkError> {
        for blueprint in registry.blueprints() {
            let key = (blueprint.product().clone(), blueprint.timeframe());
            if self.books.contains_key(&key) {
                return Err(NetworkError::Book(BookError::AlreadyBootstrapped));
            }

            let mut book = EphemeralOrderbook::new(Arc::clone(blueprint));
            book.bootstrap(price, now)?;
            self.books.insert(key.clone(), book);
            self.collect(&key);
        }

        tracing::info!(books = self.books.len(), price = %price, "network bootstrapped");
        Ok(self.books.len())
    }

    pub fn book(&self, product: &ProductId, timeframe: Timeframe) -> Result<&EphemeralOrderbook, NetworkError> {
        self.books
            .get(&(product.clone(), timeframe))
            .ok_or_else(|| NetworkError::NoOrderbook {
                product: product.clone(),
                timeframe,
            })
    }

    fn book_mut(
        &mut self,
        product: &ProductId,
        timeframe: Timeframe,
    ) -> Result<&mut EphemeralOrderbook, NetworkError> {
        self.books
            .get_mut(&(product.clone(), timeframe))
            .ok_or_else(|| NetworkError::NoOrderbook {
                product: product.clone(),
                timeframe,
            })
    }

    /// Read-only version of `place_order`.
    pub fn check_order(
        &self,
        product: &ProductId,
        request: &OrderRequest,
        timestamp: Timestamp,
    ) -> Result<&Contract, NetworkError> {
        let book = self.book(product, request.timeframe)?;
        Ok(book.check_stake(&request.contract_id, request.amount, timestamp)?)
    }

    pub fn place_order(
        &mut self,
        product: &ProductId,
        request: &OrderRequest,
        timestamp: Timestamp,
    ) -> Result<Contract, NetworkError> {
        let book = self.book_mut(product, request.timeframe)?;
        let contract = book.place_stake(
            &request.contract_id,
            &request.user_id,
            request.amount,
            timestamp,
        )?;
        self.collect(&(product.clone(), request.timeframe));
        Ok(contract)
    }

    pub fn on_tick(&mut self, price: Price, timestamp: Timestamp) -> Result<TickOutcome, NetworkError> {
        let keys: Vec<BookKey> = self.books.keys().cloned().collect();
        let mut total = TickOutcome::default();

        for key in keys {
            if let Some(book) = self.books.get_mut(&key) {
                let outcome = book.on_tick(price, timestamp)?;
                total.columns_advanced += outcome.columns_advanced;
                total.settled += outcome.settled;
                total.expired += outcome.expired;
                total.abandoned += outcome.abandoned;
            }
            self.collect(&key);
        }

        Ok(total)
    }

    pub fn contracts(&self, product: &ProductId, timeframe: Timeframe) -> Result<Vec<ClientContract>, NetworkError> {
        Ok(self.book(product, timeframe)?.client_contracts())
    }

    pub fn active_contracts(
        &self,
        product: &ProductId,
        timeframe: Timeframe,
    ) -> Result<BTreeMap<ContractId, Contract>, NetworkError> {
        Ok(self.book(product, timeframe)?.active_contracts())
    }

    pub fn contract_by_id(
        &self,
        product: &ProductId,
        timeframe: Timeframe,
        contract_id: &ContractId,
    ) -> Option<&Contract> {
        self.book(product, timeframe).ok()?.contract(contract_id)
    }

    pub fn apply_maker_quote(
        &mut self,
        product: &ProductId,
        timeframe: Timeframe,
        contract_id: &ContractId,
        quote: MakerQuote,
    ) -> Result<Contract, NetworkError> {
        let contract = self
            .book_mut(product, timeframe)?
            .set_maker_quote(contract_id, quote.clone())?;
        self.collect(&(product.clone(), timeframe));

        self.pending.push(NetworkEvent::MakerQuoteApplied(MakerQuoteAppliedEvent {
            product: product.clone(),
            timeframe,
            contract_id: contract_id.clone(),
            quote,
        }));
        Ok(contract)
    }

    pub fn pairs(&self) -> Vec<(ProductId, Timeframe)> {
        self.books.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn snapshot(&self) -> Vec<BookSnapshot> {
        self.books.values().map(EphemeralOrderbook::snapshot).collect()
    }

    pub fn drain_events(&mut self) -> Vec<NetworkEvent> {
        std::mem::take(&mut self.pending)
    }

    // pulls the book's outbox into ours, tagged with the pair
    fn collect(&mut self, key: &BookKey) {
        let Some(book) = self.books.get_mut(key) else {
            return;
        };
        for event in book.drain_events() {
            self.pending.push(NetworkEvent::Book {
                product: key.0.clone(),
                timeframe: key.1,
                event,
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("No orderbook for {product} at {timeframe}")]
    NoOrderbook { product: ProductId, timeframe: Timeframe },

    #[error(transparent)]
    Stake(#[from] StakeError),

    #[error(transparent)]
    Book(#[from] BookError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{DirectionalParams, RangeParams};
    use crate::events::BookEvent;
    use crate::types::{Quote, UserId};
    use rust_decimal_macros::dec;

    fn network() -> OrderbookNetwork {
        let mut registry = ProductRegistry::new();
        registry.register_range(&[Timeframe(2000), Timeframe(5000)], RangeParams::default());
        registry.register_directional(&[Timeframe(2000)], DirectionalParams::default());

        let mut network = OrderbookNetwork::new();
        network
            .bootstrap(&registry, Price::new_unchecked(dec!(100)), Timestamp::from_millis(0))
            .unwrap();
        network
    }

    fn future_contract(network: &OrderbookNetwork, product: &ProductId, tf: Timeframe) -> ContractId {
        network
            .active_contracts(product, tf)
            .unwrap()
            .into_values()
            .find(|c| c.grid.column == 1)
            .unwrap()
            .id
    }

    #[test]
    fn bootstrap_tags_generated_events() {
        let mut network = network();
        assert_eq!(network.len(), 3);

        let events = network.drain_events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| matches!(
            e,
            NetworkEvent::Book {
                event: BookEvent::ContractsGenerated(_),
                ..
            }
        )));
    }

    #[test]
    fn orders_route_by_product_and_timeframe() {
        let mut network = network();
        let product = ProductId::directional();
        let contract_id = future_contract(&network, &product, Timeframe(2000));

        let request = OrderRequest {
            user_id: UserId::new("alice"),
            contract_id: contract_id.clone(),
            amount: Quote::new(dec!(5)),
            timeframe: Timeframe(2000),
        };
        let contract = network
            .place_order(&product, &request, Timestamp::from_millis(10))
            .unwrap();
        assert_eq!(contract.total_volume.value(), dec!(5));

        let stored = network
            .contract_by_id(&product, Timeframe(2000), &contract_id)
            .unwrap();
        assert_eq!(stored.fill_count(), 1);

        // same id on a book that doesn't hold it
        let err = network
            .place_order(&ProductId::range(), &request, Timestamp::from_millis(10))
            .unwrap_err();
        assert_eq!(err, NetworkError::Stake(StakeError::ContractNotFound(contract_id)));
    }

    #[test]
    fn unknown_pair_is_rejected() {
        let network = network();
        let err = network
            .contracts(&ProductId::directional(), Timeframe(5000))
            .unwrap_err();
        assert!(matches!(err, NetworkError::NoOrderbook { .. }));
    }

    #[test]
    fn maker_quote_publishes_applied_event() {
        let mut network = network();
        network.drain_events();

        let product = ProductId::range();
        let contract_id = future_contract(&network, &product, Timeframe(5000));
        let quote = MakerQuote {
            maker_id: UserId::new("mm"),
            return_multiplier: dec!(2.5),
            collateral_per_unit: dec!(1),
        };
        network
            .apply_maker_quote(&product, Timeframe(5000), &contract_id, quote)
            .unwrap();

        let events = network.drain_events();
        assert!(matches!(events.last(), Some(NetworkEvent::MakerQuoteApplied(e)) if e.contract_id == contract_id));

        let client = network.contracts(&product, Timeframe(5000)).unwrap();
        let quoted = client.iter().find(|c| c.contract_id == contract_id).unwrap();
        assert_eq!(quoted.return_multiplier, dec!(2.5));
        assert_eq!(quoted.maker_id, Some(UserId::new("mm")));
    }

    #[test]
    fn tick_fans_out_to_every_book() {
        let mut network = network();
        network.drain_events();

        let outcome = network
            .on_tick(Price::new_unchecked(dec!(100)), Timestamp::from_millis(2000))
            .unwrap();
        // both 2s books advance one column, the 5s book does not
        assert_eq!(outcome.columns_advanced, 2);

        let tagged: Vec<_> = network
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                NetworkEvent::Book { timeframe, .. } => Some(timeframe),
                _ => None,
            })
            .collect();
        assert_eq!(tagged, vec![Timeframe(2000), Timeframe(2000)]);
    }
}
