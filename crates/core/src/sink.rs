//! Delivery of response units to the caller.

use std::future::Future;

use crate::error::TransportFault;
use crate::response::{ResponseUnit, StreamKind};

/// Destination for the response units of one invocation.
///
/// The engine calls `send` from a single task, in emission order. A returned
/// [`TransportFault`] ends the invocation: nothing more is sent afterwards.
pub trait ResponseSink: Send {
    fn send(
        &mut self,
        unit: ResponseUnit,
    ) -> impl Future<Output = Result<(), TransportFault>> + Send;
}

/// In-memory sink that records every unit it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    responses: Vec<ResponseUnit>,
    fail_after: Option<usize>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that accepts `count` units and then reports a transport fault.
    pub fn failing_after(count: usize) -> Self {
        Self {
            responses: Vec::new(),
            fail_after: Some(count),
        }
    }

    pub fn responses(&self) -> &[ResponseUnit] {
        &self.responses
    }

    pub fn into_responses(self) -> Vec<ResponseUnit> {
        self.responses
    }

    /// Concatenated text of every chunk from `stream`.
    pub fn output(&self, stream: StreamKind) -> String {
        self.responses
            .iter()
            .filter_map(|unit| match unit {
                ResponseUnit::Output(chunk) if chunk.stream == stream => Some(chunk.data.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn stdout(&self) -> String {
        self.output(StreamKind::Stdout)
    }

    pub fn stderr(&self) -> String {
        self.output(StreamKind::Stderr)
    }

    /// Result code carried by the last unit, if it is terminal.
    pub fn result_code(&self) -> Option<i32> {
        match self.responses.last() {
            Some(ResponseUnit::Result(result)) => Some(result.code),
            _ => None,
        }
    }
}

impl ResponseSink for CollectingSink {
    async fn send(&mut self, unit: ResponseUnit) -> Result<(), TransportFault> {
        if self.fail_after.is_some_and(|limit| self.responses.len() >= limit) {
            return Err(TransportFault::new("collector closed"));
        }
        self.responses.push(unit);
        Ok(())
    }
}
