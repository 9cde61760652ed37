#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[macro_use]
extern crate tracing;

mod connection;

pub use self::connection::{Acceptor, AcceptorConfig, AcceptorResult, AcceptorState};

// The acceptor shares the sequence vocabulary and error type with the
// connector crate.
pub use spyglass_connector::{ConnectorError, ConnectorResult, SecuritySession, Sequence, State, Written};
