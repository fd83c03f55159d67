//! Deskgate - Shared Desktop Arbitration
//!
//! This crate lets many users share one virtual machine desktop through
//! chat-style commands. Input is serialized through a single lock, each
//! requester is cooled down after acting, and the machine can be reset to a
//! snapshot directly by an admin or through a timed community vote.

pub mod config;
pub mod console;
pub mod error;
pub mod frontend;
pub mod ratelimit;
pub mod resource;
pub mod session;

#[cfg(test)]
mod testing;
