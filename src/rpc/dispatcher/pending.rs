use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::common::{Kuid, Message, MessageId, RequestSpecific};

use super::OperationId;

#[derive(Debug, Clone)]
/// What was sent, to whom, and when.
pub struct RequestHandle {
    pub message_id: MessageId,
    /// `None` when we only know the address, like when pinging a bootstrap node.
    pub contact_id: Option<Kuid>,
    pub address: SocketAddr,
    pub request: RequestSpecific,
    pub sent_at: Instant,
}

impl RequestHandle {
    /// Returns `true` if `response` has an acceptable type and comes from the contact we asked.
    pub fn check(&self, response: &Message) -> bool {
        let Some(specific) = response.as_response() else {
            return false;
        };

        if !self.request.accepts(specific) {
            return false;
        }

        match &self.contact_id {
            Some(id) => response.contact.id() == id,
            None => true,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub owner: OperationId,
    pub handle: RequestHandle,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
/// Requests awaiting a response, by message id.
pub(crate) struct PendingRequests {
    requests: HashMap<MessageId, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, owner: OperationId, handle: RequestHandle, timeout: Duration) {
        let deadline = handle.sent_at + timeout;

        self.requests.insert(
            handle.message_id,
            PendingRequest {
                owner,
                handle,
                deadline,
            },
        );
    }

    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.requests.contains_key(message_id)
    }

    pub fn remove(&mut self, message_id: &MessageId) -> Option<PendingRequest> {
        self.requests.remove(message_id)
    }

    /// Removes and returns the requests past their deadline, oldest first.
    pub fn expired(&mut self, now: Instant) -> Vec<PendingRequest> {
        let ids: Vec<MessageId> = self
            .requests
            .values()
            .filter(|request| request.deadline <= now)
            .map(|request| request.handle.message_id)
            .collect();

        let mut expired: Vec<PendingRequest> = ids
            .iter()
            .filter_map(|id| self.requests.remove(id))
            .collect();
        expired.sort_by_key(|request| request.deadline);

        expired
    }

    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.requests.drain().map(|(_, request)| request).collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}
