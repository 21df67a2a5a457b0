//! Dune Analytics API access used by the tool handlers.

mod client;
mod dex;
mod eigenlayer;
mod svm;

pub use client::{DuneClient, DuneError, PAGE_SIZE};
pub use dex::{DexPairMetrics, DEX_PAIR_COLUMNS};
pub use eigenlayer::{AvsMetrics, OperatorMetrics};
pub use svm::TokenBalance;
