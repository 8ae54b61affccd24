//! Next-close stock price forecasting with a two-layer LSTM.
//!
//! - `data` - market data download and dataset preparation
//! - `ml` - scaler, windowing, LSTM model, training and inference
//! - `web` - HTTP prediction API

pub mod config;
pub mod data;
pub mod error;
pub mod ml;
pub mod web;
