// 3.3: product registry. blueprints are built once per (product, timeframe) at startup
// and handed out as shared references. unknown pairs are a validation failure upstream.

use super::{
    DirectionalBlueprint, DirectionalParams, ProductBlueprint, RangeBlueprint, RangeParams,
};
use crate::types::{ProductId, Timeframe};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct ProductRegistry {
    blueprints: BTreeMap<ProductId, BTreeMap<Timeframe, Arc<dyn ProductBlueprint>>>,
}

impl ProductRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for every timeframe in `timeframes`. re-registering replaces.
    pub fn register<F>(&mut self, product: ProductId, timeframes: &[Timeframe], factory: F)
    where
        F: Fn(Timeframe) -> Arc<dyn ProductBlueprint>,
    {
        let entry = self.blueprints.entry(product).or_default();
        for &timeframe in timeframes {
            entry.insert(timeframe, factory(timeframe));
        }
    }

    pub fn register_range(&mut self, timeframes: &[Timeframe], params: RangeParams) {
        let product = ProductId::range();
        let id = product.clone();
        self.register(product, timeframes, move |tf| -> Arc<dyn ProductBlueprint> {
            Arc::new(RangeBlueprint::new(id.clone(), tf, params.clone()))
        });
    }

    pub fn register_directional(&mut self, timeframes: &[Timeframe], params: DirectionalParams) {
        let product = ProductId::directional();
        let id = product.clone();
        self.register(product, timeframes, move |tf| -> Arc<dyn ProductBlueprint> {
            Arc::new(DirectionalBlueprint::new(id.clone(), tf, params.clone()))
        });
    }

    pub fn get_blueprint(
        &self,
        product: &ProductId,
        timeframe: Timeframe,
    ) -> Result<Arc<dyn ProductBlueprint>, RegistryError> {
        let by_timeframe = self
            .blueprints
            .get(product)
            .ok_or_else(|| RegistryError::UnsupportedProduct(product.clone()))?;

        by_timeframe
            .get(&timeframe)
            .cloned()
            .ok_or_else(|| RegistryError::UnsupportedTimeframe {
                product: product.clone(),
                timeframe,
            })
    }

    pub fn products(&self) -> impl Iterator<Item = &ProductId> {
        self.blueprints.keys()
    }

    pub fn timeframes(&self, product: &ProductId) -> Vec<Timeframe> {
        self.blueprints
            .get(product)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn pairs(&self) -> Vec<(ProductId, Timeframe)> {
        self.blueprints
            .iter()
            .flat_map(|(product, m)| m.keys().map(move |tf| (product.clone(), *tf)))
            .collect()
    }

    pub fn blueprints(&self) -> impl Iterator<Item = &Arc<dyn ProductBlueprint>> {
        self.blueprints.values().flat_map(|m| m.values())
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unsupported product {0}")]
    UnsupportedProduct(ProductId),

    #[error("Unsupported timeframe {timeframe} for {product}")]
    UnsupportedTimeframe {
        product: ProductId,
        timeframe: Timeframe,
    },
}
