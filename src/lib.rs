pub mod agent;
pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod platform;
pub mod shutdown;
pub mod tools;
pub mod workflow;
pub mod workspace;

#[cfg(test)]
mod testing;
