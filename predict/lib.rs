#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod expression;
pub mod pipeline;
pub mod predictor;
pub mod report;
pub mod types;
pub mod workers;

#[path = "../enrich/mod.rs"]
pub mod enrich;

#[path = "../classify/mod.rs"]
pub mod classify;
