//! [`Transport`](crate::traits::Transport) implementations.

pub mod memory;

pub use memory::InMemoryTransport;
