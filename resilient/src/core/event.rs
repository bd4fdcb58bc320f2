//! Execution events emitted by policies and executors.

use crate::errors::ResilientError;
use crate::utils::{format_timestamp, now_utc};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The group an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventGroup {
    /// Lifecycle of an execution.
    Execution,
    /// Failures observed during an execution.
    Exception,
    /// Connection state changes.
    State,
}

impl EventGroup {
    /// Returns the wire name of the group.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Exception => "exception",
            Self::State => "state",
        }
    }
}

/// Lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    /// The protected operation was entered for the first time.
    Start,
    /// The execution finished after having started.
    Stop,
    /// Cancellation was requested.
    Cancel,
    /// The durable record of the execution was removed.
    Clear,
}

/// Exception event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    /// A failure that did not end the execution.
    Warn,
    /// The failure the execution ended with.
    Error,
}

/// Connection states, reserved for connection consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// A connection attempt is in progress.
    Opening,
    /// The connection is established.
    Open,
    /// The connection is being torn down.
    Closing,
    /// The connection is closed.
    Close,
}

/// Event payload, grouped by kind.
#[derive(Debug, Clone)]
pub enum EventData {
    /// An execution lifecycle event.
    Execution(ExecutionType),
    /// A failure, with the error it carries.
    Exception(ExceptionType, ResilientError),
    /// A connection state change.
    State(ConnectionState),
}

/// An event describing the lifecycle of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    /// The execution id, if the event belongs to one.
    pub id: Option<String>,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub data: EventData,
}

impl ExecutionEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(id: Option<String>, data: EventData) -> Self {
        Self {
            id,
            timestamp: now_utc(),
            data,
        }
    }

    /// Creates an execution lifecycle event.
    #[must_use]
    pub fn execution(id: impl Into<String>, kind: ExecutionType) -> Self {
        Self::new(Some(id.into()), EventData::Execution(kind))
    }

    /// Creates an exception event.
    #[must_use]
    pub fn exception(id: impl Into<String>, kind: ExceptionType, error: ResilientError) -> Self {
        Self::new(Some(id.into()), EventData::Exception(kind, error))
    }

    /// Creates a connection state event.
    #[must_use]
    pub fn state(id: Option<String>, state: ConnectionState) -> Self {
        Self::new(id, EventData::State(state))
    }

    /// Returns the group of the event.
    #[must_use]
    pub const fn group(&self) -> EventGroup {
        match self.data {
            EventData::Execution(_) => EventGroup::Execution,
            EventData::Exception(..) => EventGroup::Exception,
            EventData::State(_) => EventGroup::State,
        }
    }

    /// Returns the wire name of the event type (e.g. `"start"`, `"warn"`).
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self.data {
            EventData::Execution(ExecutionType::Start) => "start",
            EventData::Execution(ExecutionType::Stop) => "stop",
            EventData::Execution(ExecutionType::Cancel) => "cancel",
            EventData::Execution(ExecutionType::Clear) => "clear",
            EventData::Exception(ExceptionType::Warn, _) => "warn",
            EventData::Exception(ExceptionType::Error, _) => "error",
            EventData::State(ConnectionState::Opening) => "opening",
            EventData::State(ConnectionState::Open) => "open",
            EventData::State(ConnectionState::Closing) => "closing",
            EventData::State(ConnectionState::Close) => "close",
        }
    }

    /// Returns the error carried by an exception event.
    #[must_use]
    pub const fn error(&self) -> Option<&ResilientError> {
        match &self.data {
            EventData::Exception(_, error) => Some(error),
            _ => None,
        }
    }

    /// Returns true for terminal lifecycle events.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.data,
            EventData::Execution(ExecutionType::Stop | ExecutionType::Clear)
        )
    }

    /// Converts the event to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("id".to_string(), serde_json::json!(self.id));
        map.insert("group".to_string(), serde_json::json!(self.group().as_str()));
        map.insert("type".to_string(), serde_json::json!(self.type_name()));
        map.insert(
            "timestamp".to_string(),
            serde_json::json!(format_timestamp(&self.timestamp)),
        );

        let data = self.error().map_or(serde_json::Value::Null, |error| {
            serde_json::Value::Object(error.to_dict().into_iter().collect())
        });
        map.insert("data".to_string(), data);
        map
    }

    /// Renders the event as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.to_dict().into_iter().collect())
    }
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group().as_str(), self.type_name())?;
        if let Some(ref id) = self.id {
            write!(f, " [{id}]")?;
        }
        if let Some(error) = self.error() {
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}
