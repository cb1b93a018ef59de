#![doc = include_str!("../README.md")]

pub mod engine;
mod error;
mod id;
pub mod record;
mod service;
pub mod store;
mod time;

pub use crate::error::*;
pub use crate::id::*;
pub use crate::record::{ConsumptionRecord, EventType, LogEntry, ObjectType, Range};
pub use crate::service::*;
pub use crate::store::{DocumentKey, DocumentStore, MemoryStore, UpdatePolicy};
pub use crate::time::*;
