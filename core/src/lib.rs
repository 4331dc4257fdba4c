pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod indicators;
pub mod kpi;
pub mod mining;
pub mod normalizer;
pub mod recommendations;
pub mod report;
pub mod risk;
pub mod rng;
pub mod synthetic;
pub mod types;
