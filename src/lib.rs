pub mod bar_utils;
pub mod commands;
pub mod config;
pub mod data_context;
pub mod decision_engine;
pub mod error;
pub mod math_utils;
pub mod metadata;
pub mod models;
pub mod optimizer_status;
pub mod param_utils;
pub mod parameters;
pub mod performance;
pub mod resolver;
pub mod series;
pub mod simulation;
pub mod strategy;
pub mod strategy_utils;
pub mod trade_lifecycle;
pub mod trading_rules;

pub use error::{EngineError, EngineResult};
