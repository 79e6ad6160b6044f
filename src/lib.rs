pub mod config;
pub mod runtime;
pub mod blueprint;
pub mod generator;
pub mod fragment;
