#![deny(rust_2018_idioms)]
#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! Selection of ads and counters for the pages of a news site.
//!
//! A [`Selector`] is built from conditions, pages, slots, creatives and
//! counters, finalized once and then shared read-only between the request
//! handlers through a [`SelectorStore`].

pub use self::{
    config::{configuration, Config, Environment},
    error::Error,
    selector::Selector,
    store::SelectorStore,
    strategy::CreativeWeightStrategy,
};

pub mod config;
mod error;
pub mod placement;
pub mod selector;
pub mod store;
pub mod strategy;
