//! Fair-value strategies
//!
//! A strategy turns a market (and the same market at other bookmakers)
//! into a fair probability for one outcome.

use super::devig::devig;
use super::MarketContext;
use crate::config::{DevigMethod, EvaluatorSettings, FairValueKind};
use crate::types::{Market, Outcome};

pub trait FairValueStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fair probability of `outcome`, or `None` when the context cannot support one
    fn fair_probability(&self, outcome: &Outcome, ctx: &MarketContext<'_>) -> Option<f64>;
}

/// Build the strategy selected in the evaluator settings
pub fn from_settings(settings: &EvaluatorSettings) -> Box<dyn FairValueStrategy> {
    let devig_reference = settings.devig_reference.then_some(settings.devig_method);
    match settings.fair_value {
        FairValueKind::Reference => {
            let source = match &settings.reference_bookmaker {
                Some(book) => ReferenceSource::Bookmaker(book.clone()),
                None => ReferenceSource::Provider,
            };
            Box::new(ReferencePrice::new(source, devig_reference))
        }
        FairValueKind::Consensus => Box::new(Consensus::new(
            settings.devig_method,
            settings.min_bookmakers,
        )),
    }
}

/// Where reference prices come from
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceSource {
    /// Fair odds published by the provider on each outcome
    Provider,
    /// The same outcome as priced by a designated (sharp) bookmaker
    Bookmaker(String),
}

/// Compare against a designated reference price
#[derive(Debug, Clone)]
pub struct ReferencePrice {
    source: ReferenceSource,
    devig: Option<DevigMethod>,
}

impl ReferencePrice {
    pub fn new(source: ReferenceSource, devig: Option<DevigMethod>) -> Self {
        Self { source, devig }
    }

    /// Reference odds for every outcome of `market`, in market order
    fn reference_book(&self, market: &Market, ctx: &MarketContext<'_>) -> Option<Vec<f64>> {
        match &self.source {
            ReferenceSource::Provider => market.outcomes.iter().map(|o| o.reference_odds).collect(),
            ReferenceSource::Bookmaker(book) => {
                let sharp = ctx.peers.iter().find(|m| &m.bookmaker == book)?;
                market
                    .outcomes
                    .iter()
                    .map(|o| sharp.outcome(&o.label).map(|s| s.odds))
                    .collect()
            }
        }
    }

    fn single_reference(&self, outcome: &Outcome, ctx: &MarketContext<'_>) -> Option<f64> {
        match &self.source {
            ReferenceSource::Provider => outcome.reference_odds,
            ReferenceSource::Bookmaker(book) => ctx
                .peers
                .iter()
                .find(|m| &m.bookmaker == book)?
                .outcome(&outcome.label)
                .map(|o| o.odds),
        }
    }
}

impl FairValueStrategy for ReferencePrice {
    fn name(&self) -> &'static str {
        match self.source {
            ReferenceSource::Provider => "reference",
            ReferenceSource::Bookmaker(_) => "reference-book",
        }
    }

    fn fair_probability(&self, outcome: &Outcome, ctx: &MarketContext<'_>) -> Option<f64> {
        if let Some(method) = self.devig {
            if let Some(book) = self.reference_book(ctx.market, ctx) {
                let fair = devig(&book, method)?;
                let idx = ctx.market.outcomes.iter().position(|o| o.label == outcome.label)?;
                return fair.get(idx).copied();
            }
        }

        self.single_reference(outcome, ctx)
            .filter(|&odds| odds > 1.0)
            .map(|odds| 1.0 / odds)
    }
}

/// De-vigged average of every bookmaker quoting the market
#[derive(Debug, Clone)]
pub struct Consensus {
    method: DevigMethod,
    min_bookmakers: usize,
}

impl Consensus {
    pub fn new(method: DevigMethod, min_bookmakers: usize) -> Self {
        Self {
            method,
            min_bookmakers: min_bookmakers.max(1),
        }
    }
}

impl FairValueStrategy for Consensus {
    fn name(&self) -> &'static str {
        "consensus"
    }

    fn fair_probability(&self, outcome: &Outcome, ctx: &MarketContext<'_>) -> Option<f64> {
        let books: Vec<&Market> = std::iter::once(ctx.market)
            .chain(ctx.peers.iter().copied())
            .collect();

        let mut averaged = Vec::with_capacity(ctx.market.outcomes.len());
        for own in &ctx.market.outcomes {
            let quotes: Vec<f64> = books
                .iter()
                .filter_map(|m| m.outcome(&own.label))
                .map(|o| o.odds)
                .collect();
            if quotes.len() < self.min_bookmakers {
                return None;
            }
            averaged.push(quotes.iter().sum::<f64>() / quotes.len() as f64);
        }

        let fair = devig(&averaged, self.method)?;
        let idx = ctx.market.outcomes.iter().position(|o| o.label == outcome.label)?;
        fair.get(idx).copied()
    }
}
