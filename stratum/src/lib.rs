//! Stratum v1 wire layer and upstream pool client

pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;

pub use client::{ClientConfig, ClientEvent, StratumClient};
pub use error::{StratumError, StratumResult};
pub use protocol::{MiningSubmitParams, StratumMessage, StratumRequest, StratumResponse, SubscribeResult};
