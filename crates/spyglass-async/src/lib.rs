#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[macro_use]
extern crate tracing;

mod framed;
mod tokio;

pub use self::framed::{
    single_sequence_step, single_sequence_step_read, Framed, FramedRead, FramedWrite, StreamWrapper,
};
pub use self::tokio::{TokioFramed, TokioStream};
