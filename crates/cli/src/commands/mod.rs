pub mod chain;
pub mod common;
pub mod tx;
pub mod wallet;
