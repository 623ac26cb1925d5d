//! # stockdash
//!
//! Data layer and JSON API behind a stock analysis dashboard:
//! - price / volume history and fundamentals fetched from a market-data provider
//! - moving-average and rolling-std overlays, daily / weekly / monthly returns
//! - financial statement, balance sheet, earnings, holders and analyst tables
//!
//! The browser front end calls one endpoint per panel (see [`api::router`]).

pub mod api;
pub mod config;
pub mod data_structures;
pub mod derived;
pub mod error;
pub mod provider;
pub mod request;
pub mod source;
pub mod utils;
pub mod yahoo;

pub use error::DashError;
pub use provider::DataProvider;
