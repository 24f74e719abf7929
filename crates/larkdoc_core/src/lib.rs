pub mod blocks;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod docref;
pub mod error;
pub mod reshape;
pub mod runtime;
pub mod service;

#[cfg(test)]
mod http_stub;
#[cfg(test)]
mod mock;
