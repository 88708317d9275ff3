//! In-memory [`Channel`] test double for the control loop and telemetry tests.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use dispenser_traits::{BoxError, Channel, InboundMessage};

#[derive(Debug, Default)]
struct Wire {
    inbound: VecDeque<InboundMessage>,
    published: Vec<(String, Vec<u8>)>,
    fail_publish: bool,
    fail_poll: bool,
    fail_close: bool,
    closed: bool,
}

/// A [`Channel`] backed by two queues. Clones share the same queues, so a
/// test keeps one clone to feed commands and inspect publishes while the
/// loop owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    wire: Rc<RefCell<Wire>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.wire.borrow_mut().inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.into(),
        });
    }

    /// Everything published so far, oldest first.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.wire.borrow().published.clone()
    }

    /// Payloads published on one topic.
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.wire
            .borrow()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn fail_publish(&self, fail: bool) {
        self.wire.borrow_mut().fail_publish = fail;
    }

    pub fn fail_poll(&self, fail: bool) {
        self.wire.borrow_mut().fail_poll = fail;
    }

    pub fn fail_close(&self, fail: bool) {
        self.wire.borrow_mut().fail_close = fail;
    }

    pub fn is_closed(&self) -> bool {
        self.wire.borrow().closed
    }

    pub fn pending(&self) -> usize {
        self.wire.borrow().inbound.len()
    }
}

impl Channel for MemoryChannel {
    fn poll(&mut self) -> Result<Option<InboundMessage>, BoxError> {
        let mut w = self.wire.borrow_mut();
        if w.fail_poll {
            return Err(Box::new(std::io::Error::other("connection reset")));
        }
        Ok(w.inbound.pop_front())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BoxError> {
        let mut w = self.wire.borrow_mut();
        if w.fail_publish {
            return Err(Box::new(std::io::Error::other("broker unreachable")));
        }
        w.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), BoxError> {
        let mut w = self.wire.borrow_mut();
        w.closed = true;
        if w.fail_close {
            return Err(Box::new(std::io::Error::other("broken pipe")));
        }
        Ok(())
    }
}
