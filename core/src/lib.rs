pub mod association;
pub mod cache;
pub mod command;
pub mod connection;
pub mod error;
pub mod listing;
pub mod path;
pub mod repository;
pub mod session;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::SvnError;
