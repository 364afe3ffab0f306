// 11.0: every state change produces an event. each component has its own closed event enum
// and EventPayload wraps them. the EventBus keeps a bounded audit log and fans events out
// to subscribers over a broadcast channel. publishing never blocks and never calls back
// into the engine, so subscribers cannot re-enter a handler.

use crate::contract::{ClientContract, Contract, MakerQuote, Settlement};
use crate::position::Position;
use crate::types::{ContractId, PricePoint, ProductId, Quote, Timeframe, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    // Orderbook and network events, tagged with product and timeframe
    Network(NetworkEvent),

    // Ledger events
    BalanceChanged(BalanceChangedEvent),

    // Position events
    Position(PositionEvent),

    // Order service events
    OrderPlaced(OrderPlacedEvent),
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::Network(NetworkEvent::Book { event, .. }) => event.name(),
            EventPayload::Network(NetworkEvent::MakerQuoteApplied(_)) => "maker_quote_applied",
            EventPayload::BalanceChanged(_) => "balance_changed",
            EventPayload::Position(PositionEvent::Opened(_)) => "position_opened",
            EventPayload::Position(PositionEvent::Settled(_)) => "position_settled",
            EventPayload::OrderPlaced(_) => "order_placed",
        }
    }
}

// 11.1: orderbook events. produced by one ephemeral orderbook, untagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookEvent {
    ContractsGenerated(ContractsGeneratedEvent),
    ContractsUpdated(ContractsUpdatedEvent),
    ContractSettled(ContractSettledEvent),
    ContractExpired(ContractExpiredEvent),
}

impl BookEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BookEvent::ContractsGenerated(_) => "contracts_generated",
            BookEvent::ContractsUpdated(_) => "contracts_updated",
            BookEvent::ContractSettled(_) => "contract_settled",
            BookEvent::ContractExpired(_) => "contract_expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsGeneratedEvent {
    pub current_column: u64,
    pub contracts: Vec<Contract>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UpdateReason {
    ColumnsAdvanced {
        count: u64,
        current_column: u64,
        evicted: Vec<ContractId>,
    },
    MakerQuote {
        contract_id: ContractId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsUpdatedEvent {
    pub reason: UpdateReason,
    /// Contracts added or changed by this update.
    pub contracts: Vec<Contract>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSettledEvent {
    pub contract: Contract,
    pub price_point: PricePoint,
    pub return_multiplier: Decimal,
    pub settlements: Vec<Settlement>,
    pub description: String,
}

impl ContractSettledEvent {
    pub fn total_payout(&self) -> Quote {
        self.settlements.iter().map(|s| s.payout).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractExpiredEvent {
    pub contract: Contract,
    pub expired_positions: Vec<Settlement>,
    pub description: String,
}

// 11.2: network events. book events re-tagged so subscribers can demultiplex.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum NetworkEvent {
    Book {
        product: ProductId,
        timeframe: Timeframe,
        event: BookEvent,
    },
    MakerQuoteApplied(MakerQuoteAppliedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakerQuoteAppliedEvent {
    pub product: ProductId,
    pub timeframe: Timeframe,
    pub contract_id: ContractId,
    pub quote: MakerQuote,
}

// 11.3: ledger events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceChangeKind {
    Seed,
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceReason {
    InitialSeed,
    Collateral,
    Payout,
    Refund,
    MakerFloor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChangedEvent {
    pub user_id: UserId,
    pub previous: Quote,
    pub balance: Quote,
    /// Signed: positive for credits and seeds, negative for debits.
    pub change: Quote,
    pub kind: BalanceChangeKind,
    pub reason: BalanceReason,
}

// 11.4: position events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PositionEvent {
    Opened(Position),
    Settled(Position),
}

// 11.5: order events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub user_id: UserId,
    pub product: ProductId,
    pub timeframe: Timeframe,
    pub balance: Quote,
    pub contract: ClientContract,
    pub position: Position,
    pub collateral: Quote,
}

pub trait EventEmitter {
    fn emit(&mut self, event: Event);
}

/// Bounded event log plus broadcast fan-out.
#[derive(Debug)]
pub struct EventBus {
    log: VecDeque<Event>,
    max_events: usize,
    next_id: u64,
    capacity: usize,
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(max_events: usize, channel_capacity: usize) -> Self {
        let capacity = channel_capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            log: VecDeque::new(),
            max_events,
            next_id: 1,
            capacity,
            sender,
        }
    }

    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn publish(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = self.next_id();
        self.emit(Event::new(id, timestamp, payload));
        id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.log.iter()
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let start = self.log.len().saturating_sub(count);
        self.log.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn clear(&mut self) {
        self.log.clear();
    }

    /// Swaps in a fresh channel. existing receivers see `Closed` once drained.
    pub fn detach_subscribers(&mut self) {
        let (sender, _) = broadcast::channel(self.capacity);
        self.sender = sender;
    }
}

impl EventEmitter for EventBus {
    fn emit(&mut self, event: Event) {
        tracing::trace!(id = event.id.0, kind = event.payload.name(), "event");

        // no subscribers is fine, the log still has it
        let _ = self.sender.send(event.clone());

        self.log.push_back(event);
        while self.log.len() > self.max_events {
            self.log.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balance_event(user: &str) -> EventPayload {
        EventPayload::BalanceChanged(BalanceChangedEvent {
            user_id: UserId::new(user),
            previous: Quote::zero(),
            balance: Quote::new(dec!(1000)),
            change: Quote::new(dec!(1000)),
            kind: BalanceChangeKind::Seed,
            reason: BalanceReason::InitialSeed,
        })
    }

    #[test]
    fn bus_assigns_sequential_ids() {
        let mut bus = EventBus::new(100, 16);
        let a = bus.publish(Timestamp::from_millis(1), balance_event("a"));
        let b = bus.publish(Timestamp::from_millis(2), balance_event("b"));
        assert_eq!(a, EventId(1));
        assert_eq!(b, EventId(2));
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn log_is_bounded() {
        let mut bus = EventBus::new(3, 16);
        for i in 0..10 {
            bus.publish(Timestamp::from_millis(i), balance_event("a"));
        }
        assert_eq!(bus.len(), 3);
        let ids: Vec<u64> = bus.events().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![8, 9, 10]);
        assert_eq!(bus.recent(2).len(), 2);
    }

    #[test]
    fn subscribers_receive_published_events() {
        let mut bus = EventBus::new(100, 16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(Timestamp::from_millis(5), balance_event("alice"));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.payload.name(), "balance_changed");
        assert_eq!(event.timestamp, Timestamp::from_millis(5));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let mut bus = EventBus::new(100, 16);
        bus.publish(Timestamp::from_millis(0), balance_event("a"));
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn detach_closes_existing_receivers() {
        let mut bus = EventBus::new(100, 16);
        let mut rx = bus.subscribe();
        bus.publish(Timestamp::from_millis(0), balance_event("a"));
        bus.detach_subscribers();

        assert!(rx.try_recv().is_ok());
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Closed)));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let json = serde_json::to_string(&balance_event("alice")).unwrap();
        assert!(json.contains("\"type\":\"balance_changed\""));
    }
}
