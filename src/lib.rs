pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
pub mod notify;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;
