//! Ephemeral orderbook.
//!
//! One book per (product, timeframe). The book holds a sliding window of columns,
//! each column a fixed set of slots sharing one exercise window. Ticks advance the
//! window in whole timeframes: elapsed columns are evicted from the front and fresh
//! ones generated at the tail, so the window always has `total_columns` entries.
//! After advancing, every live contract is checked against the tick. A contract
//! leaves its slot the moment it reaches a terminal status, which is what makes
//! settlement at-most-once: a vacant slot cannot be resolved again.

use crate::blueprint::{ColumnContext, ProductBlueprint};
use crate::contract::{ClientContract, Contract, ContractStatus, ExerciseWindow, MakerQuote};
use crate::events::{
    BookEvent, ContractExpiredEvent, ContractSettledEvent, ContractsGeneratedEvent,
    ContractsUpdatedEvent, UpdateReason,
};
use crate::types::{ContractId, Price, PricePoint, ProductId, Quote, Timeframe, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Slot {
    Live(Contract),
    Vacant,
}

impl Slot {
    pub fn contract(&self) -> Option<&Contract> {
        match self {
            Slot::Live(c) => Some(c),
            Slot::Vacant => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Column {
    index: u64,
    window: ExerciseWindow,
    slots: Vec<Slot>,
}

impl Column {
    fn live(&self) -> impl Iterator<Item = &Contract> {
        self.slots.iter().filter_map(Slot::contract)
    }
}

/// What a single tick did to the book.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub columns_advanced: u64,
    pub settled: usize,
    pub expired: usize,
    pub abandoned: usize,
}

impl TickOutcome {
    fn merge(&mut self, other: &TickOutcome) {
        self.columns_advanced += other.columns_advanced;
        self.settled += other.settled;
        self.expired += other.expired;
        self.abandoned += other.abandoned;
    }
}

enum Resolution {
    Exercise,
    Expire,
    Abandon,
}

#[derive(Debug)]
pub struct EphemeralOrderbook {
    blueprint: Arc<dyn ProductBlueprint>,
    columns: VecDeque<Column>,
    current_column: u64,
    origin: Timestamp,
    reference_price: Option<Price>,
    locator: HashMap<ContractId, (u64, usize)>,
    bootstrapped: bool,
    pending: Vec<BookEvent>,
}

impl EphemeralOrderbook {
    pub fn new(blueprint: Arc<dyn ProductBlueprint>) -> Self {
        Self {
            blueprint,
            columns: VecDeque::new(),
            current_column: 0,
            origin: Timestamp::from_millis(0),
            reference_price: None,
            locator: HashMap::new(),
            bootstrapped: false,
            pending: Vec::new(),
        }
    }

    pub fn product(&self) -> &ProductId {
        self.blueprint.product()
    }

    pub fn timeframe(&self) -> Timeframe {
        self.blueprint.timeframe()
    }

    pub fn blueprint(&self) -> &Arc<dyn ProductBlueprint> {
        &self.blueprint
    }

    pub fn total_columns(&self) -> usize {
        self.blueprint.total_columns()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn current_column(&self) -> u64 {
        self.current_column
    }

    /// Start of the current column's window.
    pub fn start_time(&self) -> Timestamp {
        self.window_for(self.current_column).start
    }

    pub fn reference_price(&self) -> Option<Price> {
        self.reference_price
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn bootstrap(&mut self, price: Price, now: Timestamp) -> Result<(), BookError> {
        if self.bootstrapped {
            return Err(BookError::AlreadyBootstrapped);
        }

        self.origin = now;
        self.current_column = 0;
        self.reference_price = Some(price);

        let mut generated = Vec::new();
        for index in 0..self.total_columns() as u64 {
            let column = self.generate(index, price);
            generated.extend(column.live().cloned());
            self.columns.push_back(column);
        }
        self.bootstrapped = true;

        tracing::debug!(
            product = %self.product(),
            timeframe = %self.timeframe(),
            contracts = generated.len(),
            "orderbook bootstrapped"
        );

        self.pending.push(BookEvent::ContractsGenerated(ContractsGeneratedEvent {
            current_column: self.current_column,
            contracts: generated,
        }));
        Ok(())
    }

    fn window_for(&self, column: u64) -> ExerciseWindow {
        let tf = self.timeframe();
        let start = self.origin.plus_millis(column as i64 * tf.as_millis());
        ExerciseWindow::new(start, tf)
    }

    fn generate(&mut self, index: u64, reference_price: Price) -> Column {
        let window = self.window_for(index);
        let ctx = ColumnContext {
            column: index,
            window,
            reference_price,
        };

        let rows = self.blueprint.rows_per_column();
        let mut slots = vec![Slot::Vacant; rows];
        for contract in self.blueprint.generate_column(&ctx) {
            let row = contract.grid.row;
            if row >= rows {
                tracing::warn!(contract = %contract.id, row, rows, "blueprint produced out of range row");
                continue;
            }
            self.locator.insert(contract.id.clone(), (index, row));
            slots[row] = Slot::Live(contract);
        }

        Column {
            index,
            window,
            slots,
        }
    }

    fn locate(&self, contract_id: &ContractId) -> Option<(usize, usize)> {
        let &(column, row) = self.locator.get(contract_id)?;
        let offset = column.checked_sub(self.current_column)? as usize;
        (offset < self.columns.len()).then_some((offset, row))
    }

    pub fn contract(&self, contract_id: &ContractId) -> Option<&Contract> {
        let (col, row) = self.locate(contract_id)?;
        self.columns.get(col)?.slots.get(row)?.contract()
    }

    fn contract_mut(&mut self, contract_id: &ContractId) -> Option<&mut Contract> {
        let (col, row) = self.locate(contract_id)?;
        match self.columns.get_mut(col)?.slots.get_mut(row)? {
            Slot::Live(c) => Some(c),
            Slot::Vacant => None,
        }
    }

    /// Every stake check, no mutation.
    pub fn check_stake(
        &self,
        contract_id: &ContractId,
        amount: Quote,
        timestamp: Timestamp,
    ) -> Result<&Contract, StakeError> {
        if !amount.is_positive() {
            return Err(StakeError::InvalidAmount(amount));
        }

        let contract = self
            .contract(contract_id)
            .ok_or_else(|| StakeError::ContractNotFound(contract_id.clone()))?;

        if !contract.is_active() {
            return Err(StakeError::ContractNotActive {
                contract_id: contract_id.clone(),
                status: contract.status,
            });
        }

        if !contract.accepts_stake_at(timestamp) {
            return Err(StakeError::AlreadyStarted {
                contract_id: contract_id.clone(),
                window_start: contract.window.start,
            });
        }

        if contract.volume_after(amount).is_none() {
            return Err(StakeError::VolumeOverflow {
                contract_id: contract_id.clone(),
                amount,
            });
        }

        Ok(contract)
    }

    pub fn place_stake(
        &mut self,
        contract_id: &ContractId,
        user_id: &UserId,
        amount: Quote,
        timestamp: Timestamp,
    ) -> Result<Contract, StakeError> {
        self.check_stake(contract_id, amount, timestamp)?;

        let blueprint = Arc::clone(&self.blueprint);
        let contract = self
            .contract_mut(contract_id)
            .ok_or_else(|| StakeError::ContractNotFound(contract_id.clone()))?;
        contract.add_fill(user_id.clone(), amount, timestamp);

        Ok(blueprint.clone_contract(contract))
    }

    pub fn set_maker_quote(
        &mut self,
        contract_id: &ContractId,
        quote: MakerQuote,
    ) -> Result<Contract, BookError> {
        let blueprint = Arc::clone(&self.blueprint);
        let contract = self
            .contract_mut(contract_id)
            .filter(|c| c.is_active())
            .ok_or_else(|| BookError::ContractNotFound(contract_id.clone()))?;

        contract.maker_quote = Some(quote);
        let snapshot = blueprint.clone_contract(contract);

        self.pending.push(BookEvent::ContractsUpdated(ContractsUpdatedEvent {
            reason: UpdateReason::MakerQuote {
                contract_id: contract_id.clone(),
            },
            contracts: vec![snapshot.clone()],
        }));
        Ok(snapshot)
    }

    pub fn on_tick(&mut self, price: Price, timestamp: Timestamp) -> Result<TickOutcome, BookError> {
        if !self.bootstrapped {
            return Err(BookError::NotBootstrapped);
        }

        self.reference_price = Some(price);
        let mut outcome = TickOutcome::default();

        let tf = self.timeframe().as_millis();
        let elapsed = timestamp.millis_since(self.start_time());
        if elapsed >= tf {
            let steps = (elapsed / tf) as u64;
            outcome.merge(&self.advance(steps, price));
        }

        outcome.merge(&self.scan(PricePoint::new(price, timestamp)));
        Ok(outcome)
    }

    // evict up to `steps` front columns, then refill the tail from the new current index
    fn advance(&mut self, steps: u64, reference_price: Price) -> TickOutcome {
        let mut outcome = TickOutcome {
            columns_advanced: steps,
            ..Default::default()
        };
        let mut evicted = Vec::new();

        let evict = steps.min(self.columns.len() as u64);
        for _ in 0..evict {
            let Some(column) = self.columns.pop_front() else {
                break;
            };
            for slot in column.slots {
                let Slot::Live(contract) = slot else {
                    continue;
                };
                self.locator.remove(&contract.id);
                evicted.push(contract.id.clone());
                if !contract.is_active() {
                    continue;
                }
                if contract.has_volume() {
                    if self.expire(contract) {
                        outcome.expired += 1;
                    }
                } else if self.abandon(contract) {
                    outcome.abandoned += 1;
                }
            }
        }

        self.current_column += steps;

        let mut added = Vec::new();
        while self.columns.len() < self.total_columns() {
            let index = self.current_column + self.columns.len() as u64;
            let column = self.generate(index, reference_price);
            added.extend(column.live().cloned());
            self.columns.push_back(column);
        }

        tracing::trace!(
            product = %self.product(),
            timeframe = %self.timeframe(),
            steps,
            current = self.current_column,
            "columns advanced"
        );

        self.pending.push(BookEvent::ContractsUpdated(ContractsUpdatedEvent {
            reason: UpdateReason::ColumnsAdvanced {
                count: steps,
                current_column: self.current_column,
                evicted,
            },
            contracts: added,
        }));

        outcome
    }

    fn scan(&mut self, point: PricePoint) -> TickOutcome {
        let blueprint = Arc::clone(&self.blueprint);
        let mut resolved = Vec::new();

        for column in self.columns.iter_mut() {
            for slot in column.slots.iter_mut() {
                let resolution = match slot {
                    Slot::Live(c) if c.is_active() => {
                        if c.window.contains(point.timestamp)
                            && c.has_volume()
                            && blueprint.is_winning_price(c, &point)
                        {
                            Resolution::Exercise
                        } else if c.window.has_lapsed(point.timestamp) {
                            if c.has_volume() {
                                Resolution::Expire
                            } else {
                                Resolution::Abandon
                            }
                        } else {
                            continue;
                        }
                    }
                    _ => continue,
                };

                if let Slot::Live(contract) = std::mem::replace(slot, Slot::Vacant) {
                    resolved.push((contract, resolution));
                }
            }
        }

        let mut outcome = TickOutcome::default();
        for (contract, resolution) in resolved {
            self.locator.remove(&contract.id);
            match resolution {
                Resolution::Exercise => {
                    if self.exercise(contract, point) {
                        outcome.settled += 1;
                    }
                }
                Resolution::Expire => {
                    if self.expire(contract) {
                        outcome.expired += 1;
                    }
                }
                Resolution::Abandon => {
                    if self.abandon(contract) {
                        outcome.abandoned += 1;
                    }
                }
            }
        }
        outcome
    }

    fn exercise(&mut self, mut contract: Contract, point: PricePoint) -> bool {
        let multiplier = self.blueprint.return_multiplier(&contract);
        if let Err(e) = contract.transition(self.blueprint.winning_status()) {
            tracing::error!(error = %e, "exercise skipped");
            return false;
        }

        let settlements = contract.settlements(multiplier);
        let description = self.blueprint.describe_settlement(&contract, &point);
        tracing::info!(
            contract = %contract.id,
            volume = %contract.total_volume,
            multiplier = %multiplier,
            "contract settled"
        );

        self.pending.push(BookEvent::ContractSettled(ContractSettledEvent {
            contract,
            price_point: point,
            return_multiplier: multiplier,
            settlements,
            description,
        }));
        true
    }

    fn expire(&mut self, mut contract: Contract) -> bool {
        if let Err(e) = contract.transition(ContractStatus::Expired) {
            tracing::error!(error = %e, "expiry skipped");
            return false;
        }

        let expired_positions = contract.zero_settlements();
        let description = self.blueprint.describe_expiry(&contract);
        tracing::info!(contract = %contract.id, volume = %contract.total_volume, "contract expired");

        self.pending.push(BookEvent::ContractExpired(ContractExpiredEvent {
            contract,
            expired_positions,
            description,
        }));
        true
    }

    // no stakes, nobody to tell
    fn abandon(&self, mut contract: Contract) -> bool {
        if let Err(e) = contract.transition(ContractStatus::Abandoned) {
            tracing::error!(contract = %contract.id, error = %e, "abandon skipped");
            return false;
        }
        true
    }

    /// Deep copies of every active contract, keyed by id.
    pub fn active_contracts(&self) -> BTreeMap<ContractId, Contract> {
        self.columns
            .iter()
            .flat_map(Column::live)
            .filter(|c| c.is_active())
            .map(|c| (c.id.clone(), self.blueprint.clone_contract(c)))
            .collect()
    }

    /// Client projection of the active contracts, front column first.
    pub fn client_contracts(&self) -> Vec<ClientContract> {
        self.columns
            .iter()
            .flat_map(Column::live)
            .filter(|c| c.is_active())
            .map(|c| self.blueprint.to_client_contract(c))
            .collect()
    }

    pub fn drain_events(&mut self) -> Vec<BookEvent> {
        std::mem::take(&mut self.pending)
    }

    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            product: self.product().clone(),
            timeframe: self.timeframe(),
            current_column: self.current_column,
            start_time: self.start_time(),
            total_columns: self.total_columns(),
            reference_price: self.reference_price,
            columns: self
                .columns
                .iter()
                .map(|col| ColumnSnapshot {
                    index: col.index,
                    window: col.window,
                    slots: col
                        .slots
                        .iter()
                        .map(|slot| match slot {
                            Slot::Vacant => SlotSnapshot::Vacant,
                            Slot::Live(c) => SlotSnapshot::Live {
                                contract_id: c.id.clone(),
                                status: c.status,
                                total_volume: c.total_volume,
                                quoted: c.is_quoted(),
                            },
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub product: ProductId,
    pub timeframe: Timeframe,
    pub current_column: u64,
    pub start_time: Timestamp,
    pub total_columns: usize,
    pub reference_price: Option<Price>,
    pub columns: Vec<ColumnSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    pub index: u64,
    pub window: ExerciseWindow,
    pub slots: Vec<SlotSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotSnapshot {
    Vacant,
    Live {
        contract_id: ContractId,
        status: ContractStatus,
        total_volume: Quote,
        quoted: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StakeError {
    #[error("Contract {0} not found")]
    ContractNotFound(ContractId),

    #[error("Contract {contract_id} is {status:?}")]
    ContractNotActive {
        contract_id: ContractId,
        status: ContractStatus,
    },

    #[error("Contract {contract_id} window already started at {window_start}")]
    AlreadyStarted {
        contract_id: ContractId,
        window_start: Timestamp,
    },

    #[error("Stake amount must be positive, got {0}")]
    InvalidAmount(Quote),

    #[error("Stake of {amount} on {contract_id} exceeds representable volume")]
    VolumeOverflow { contract_id: ContractId, amount: Quote },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookError {
    #[error("Orderbook not bootstrapped")]
    NotBootstrapped,

    #[error("Orderbook already bootstrapped")]
    AlreadyBootstrapped,

    #[error("Contract {0} not found")]
    ContractNotFound(ContractId),
}
