use std::time::Duration;

use crate::common::{
    Contact, Message, MessageId, RequestKind, RequestSpecific, ResponseSpecific, SecurityToken,
};
use crate::core::scrubber::scrub;
use crate::error::RequestTimeout;
use crate::rpc::dispatcher::RequestHandle;
use crate::rpc::handler::{Process, Step};
use crate::rpc::Context;
use crate::Error;

#[derive(Debug)]
/// Asks a single contact for the token we need to store values at it.
///
/// A node hands out its token with every FIND_NODE response, so this is
/// a FIND_NODE for the contact's own id. Resolves `None` if it sent no token.
pub(crate) struct SecurityTokenProcess {
    contact: Contact,
    inflight: Option<MessageId>,
}

impl SecurityTokenProcess {
    pub fn new(contact: Contact) -> Self {
        Self {
            contact,
            inflight: None,
        }
    }
}

impl Process for SecurityTokenProcess {
    type Output = Option<SecurityToken>;

    fn start(&mut self, ctx: &mut Context) -> Step<Option<SecurityToken>> {
        let key = *self.contact.id();
        self.inflight = Some(ctx.request(&self.contact, RequestSpecific::FindNode { key })?);

        Ok(None)
    }

    fn on_response(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        response: &Message,
        _rtt: Duration,
    ) -> Step<Option<SecurityToken>> {
        if self.inflight != Some(handle.message_id) {
            return Ok(None);
        }
        self.inflight = None;

        let Some(ResponseSpecific::Nodes { token, contacts }) = response.as_response() else {
            return Ok(Some(None));
        };

        let scrubbed = scrub(
            ctx.local_node(),
            &response.contact,
            contacts,
            ctx.config.contacts_scrubber_required_ratio,
        );
        if scrubbed.valid {
            for contact in scrubbed.contacts {
                ctx.route_table.add(contact);
            }
        }

        Ok(Some(token.clone()))
    }

    fn on_timeout(
        &mut self,
        _ctx: &mut Context,
        handle: &RequestHandle,
        elapsed: Duration,
    ) -> Step<Option<SecurityToken>> {
        if self.inflight != Some(handle.message_id) {
            return Ok(None);
        }
        self.inflight = None;

        Err(Error::Timeout(RequestTimeout {
            contact_id: handle.contact_id,
            address: handle.address,
            request: RequestKind::FindNode,
            elapsed,
        }))
    }

    fn inflight(&self, message_id: &MessageId) -> bool {
        self.inflight.as_ref() == Some(message_id)
    }

    fn stop(&mut self, ctx: &mut Context) {
        if let Some(message_id) = self.inflight.take() {
            ctx.dispatcher.cancel(&message_id);
        }
    }
}
