//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the crate:
//! - the [`Strategy`] abstraction and its type-erased operation
//! - execution events and their groups

mod event;
mod strategy;

pub use event::{
    ConnectionState, EventData, EventGroup, ExceptionType, ExecutionEvent, ExecutionType,
};
pub use strategy::{downcast, protect, Payload, Protected, Strategy, StrategyExt};
