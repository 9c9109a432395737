pub mod config;
pub mod error;
pub mod http;
pub mod query;
pub mod services;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;
