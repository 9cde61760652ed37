#![allow(unused_crate_dependencies)] // there is both a library and a test binary

//! Integration tests.
//!
//! All integration tests live in this single crate, organized in modules, so
//! the library crates are linked once instead of once per test file.

mod acceptor;
mod channel_join;
mod connector;
mod e2e;
mod pdu;
