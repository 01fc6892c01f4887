//! Client construction and the composed execution path

mod builder;
mod client;

pub use builder::{Huginn, HuginnBuilder};
pub use client::ResilientClient;
