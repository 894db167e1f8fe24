//! In-memory transport for tests.
//!
//! Replays a fixed list of responses in order and records every request.

use super::{GraphqlRequest, Transport};
use crate::error::{MagicError, Result};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;

pub struct ScriptedTransport {
    responses: RefCell<VecDeque<Result<Value>>>,
    calls: RefCell<Vec<GraphqlRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<Value>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Queue another response.
    pub fn push(&self, response: Result<Value>) {
        self.responses.borrow_mut().push_back(response);
    }

    /// Requests seen so far, in order.
    pub fn calls(&self) -> Vec<GraphqlRequest> {
        self.calls.borrow().clone()
    }

    /// Endpoints called so far, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.endpoint.clone()).collect()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &GraphqlRequest) -> Result<Value> {
        self.calls.borrow_mut().push(request.clone());
        self.responses.borrow_mut().pop_front().unwrap_or_else(|| {
            Err(MagicError::remote(format!(
                "no scripted response left for {}",
                request.endpoint
            )))
        })
    }
}
