//! Answers requests from other nodes.

mod tokens;

pub use tokens::{Tokens, TOKEN_ROTATE_INTERVAL};

use std::net::SocketAddr;

use tracing::{debug, trace};

use crate::common::{
    lock_database, Contact, DhtValue, Kuid, Message, MessageType, RequestSpecific,
    ResponseSpecific, SecurityToken, SelectMode, StoreStatus, StoreStatusCode,
};

use super::Context;

/// Sends exactly one response to `request`.
pub(crate) fn handle_request(ctx: &mut Context, request: Message, from: SocketAddr) {
    let MessageType::Request(specific) = &request.message_type else {
        return;
    };

    let now = ctx.now();
    if ctx.tokens.should_update(now) {
        ctx.tokens.rotate(now);
    }

    trace!(context = "server_request", ?from, request = %specific.kind());

    let response = match specific {
        RequestSpecific::Ping => ResponseSpecific::Pong {
            external_address: from,
        },
        RequestSpecific::FindNode { key } => nodes(ctx, key, &request.contact, from),
        RequestSpecific::FindValue { key } => {
            let values = lock_database(&ctx.database).get(key);

            if values.is_empty() {
                nodes(ctx, key, &request.contact, from)
            } else {
                ResponseSpecific::Values { values }
            }
        }
        RequestSpecific::Store { token, values } => store(ctx, token, values, from),
    };

    let message = Message::response(request.message_id, ctx.local_node().clone(), response);

    if let Err(error) = ctx.dispatcher.send_response(from, message) {
        debug!(?from, ?error, "Failed to send response");
    }
}

fn nodes(ctx: &Context, key: &Kuid, requester: &Contact, from: SocketAddr) -> ResponseSpecific {
    let local_id = ctx.local_node().id();
    let k = ctx.config.k;

    let contacts = ctx
        .route_table
        .select(key, k + 2, SelectMode::Alive)
        .into_iter()
        // Other nodes under the requester's id are collisions to it.
        .filter(|contact| {
            contact.id() != local_id
                && !(contact.id() == requester.id() && contact.address() == from)
        })
        .take(k)
        .collect();

    ResponseSpecific::Nodes {
        token: Some(ctx.tokens.generate_token(from)),
        contacts,
    }
}

fn store(
    ctx: &Context,
    token: &SecurityToken,
    values: &[DhtValue],
    from: SocketAddr,
) -> ResponseSpecific {
    if !ctx.tokens.validate(from, token.as_bytes()) {
        debug!(?from, "Invalid security token in store request");

        return ResponseSpecific::StoreStatus {
            statuses: values
                .iter()
                .map(|value| StoreStatus::new(value, StoreStatusCode::Error))
                .collect(),
        };
    }

    let mut database = lock_database(&ctx.database);
    let statuses = values
        .iter()
        .map(|value| {
            let code = if database.store(value.clone()) {
                StoreStatusCode::Ok
            } else {
                StoreStatusCode::Error
            };

            StoreStatus::new(value, code)
        })
        .collect();

    ResponseSpecific::StoreStatus { statuses }
}
