#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Streaming endpoint for Hyperliquid mainnet
pub const MAINNET_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";

/// Streaming endpoint for Hyperliquid testnet
pub const TESTNET_WS_URL: &str = "wss://api.hyperliquid-testnet.xyz/ws";
