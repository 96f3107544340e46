//! Typed messages exchanged between nodes.
//!
//! The engine only ever sees these types, the bencode form in [internal] is what
//! datagram transports put on the wire.

mod internal;

use std::fmt::{self, Debug, Display, Formatter};
use std::net::SocketAddr;

use bytes::Bytes;
use rand::Rng;

use crate::common::{Contact, Kuid};
use crate::{Error, Result};

/// Size of a [MessageId] in bytes.
pub const MESSAGE_ID_SIZE: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
/// Random id correlating a response with its request.
pub struct MessageId([u8; MESSAGE_ID_SIZE]);

impl MessageId {
    pub fn random() -> MessageId {
        MessageId(rand::thread_rng().gen())
    }

    pub const fn from_array(bytes: [u8; MESSAGE_ID_SIZE]) -> MessageId {
        MessageId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_SIZE] {
        &self.0
    }
}

impl Debug for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId(")?;
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Opaque proof, handed out by a node, that we may store values at it.
pub struct SecurityToken(Vec<u8>);

impl SecurityToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        SecurityToken(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for SecurityToken {
    fn from(bytes: &[u8]) -> Self {
        SecurityToken(bytes.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A value stored in the DHT.
///
/// Values are addressed by `(primary_key, secondary_key)`, the secondary key
/// being the id of the node that created the value.
pub struct DhtValue {
    primary_key: Kuid,
    secondary_key: Kuid,
    value: Bytes,
}

impl DhtValue {
    pub fn new(primary_key: Kuid, creator: Kuid, value: Bytes) -> Self {
        Self {
            primary_key,
            secondary_key: creator,
            value,
        }
    }

    pub fn primary_key(&self) -> &Kuid {
        &self.primary_key
    }

    pub fn secondary_key(&self) -> &Kuid {
        &self.secondary_key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreStatusCode {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Outcome of storing one value at one node.
pub struct StoreStatus {
    pub primary_key: Kuid,
    pub secondary_key: Kuid,
    pub code: StoreStatusCode,
}

impl StoreStatus {
    pub fn new(value: &DhtValue, code: StoreStatusCode) -> Self {
        Self {
            primary_key: value.primary_key,
            secondary_key: value.secondary_key,
            code,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StoreStatusCode::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Ping,
    FindNode,
    FindValue,
    Store,
}

impl Display for RequestKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Ping => "PING",
            RequestKind::FindNode => "FIND_NODE",
            RequestKind::FindValue => "FIND_VALUE",
            RequestKind::Store => "STORE",
        };

        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: MessageId,
    /// The sender of this message.
    pub contact: Contact,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageType {
    Request(RequestSpecific),
    Response(ResponseSpecific),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestSpecific {
    Ping,
    FindNode {
        key: Kuid,
    },
    FindValue {
        key: Kuid,
    },
    Store {
        token: SecurityToken,
        values: Vec<DhtValue>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseSpecific {
    Pong {
        /// The address we saw the requester at.
        external_address: SocketAddr,
    },
    Nodes {
        /// Token the requester may use to store at the responder.
        token: Option<SecurityToken>,
        contacts: Vec<Contact>,
    },
    Values {
        values: Vec<DhtValue>,
    },
    StoreStatus {
        statuses: Vec<StoreStatus>,
    },
}

impl RequestSpecific {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestSpecific::Ping => RequestKind::Ping,
            RequestSpecific::FindNode { .. } => RequestKind::FindNode,
            RequestSpecific::FindValue { .. } => RequestKind::FindValue,
            RequestSpecific::Store { .. } => RequestKind::Store,
        }
    }

    /// Returns `true` if `response` is a valid answer type for this request.
    pub fn accepts(&self, response: &ResponseSpecific) -> bool {
        matches!(
            (self, response),
            (RequestSpecific::Ping, ResponseSpecific::Pong { .. })
                | (RequestSpecific::FindNode { .. }, ResponseSpecific::Nodes { .. })
                | (RequestSpecific::FindValue { .. }, ResponseSpecific::Nodes { .. })
                | (RequestSpecific::FindValue { .. }, ResponseSpecific::Values { .. })
                | (RequestSpecific::Store { .. }, ResponseSpecific::StoreStatus { .. })
        )
    }
}

impl Message {
    pub fn request(message_id: MessageId, contact: Contact, request: RequestSpecific) -> Self {
        Message {
            message_id,
            contact,
            message_type: MessageType::Request(request),
        }
    }

    pub fn response(message_id: MessageId, contact: Contact, response: ResponseSpecific) -> Self {
        Message {
            message_id,
            contact,
            message_type: MessageType::Response(response),
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self.message_type, MessageType::Request(_))
    }

    pub fn as_response(&self) -> Option<&ResponseSpecific> {
        match &self.message_type {
            MessageType::Response(response) => Some(response),
            _ => None,
        }
    }

    /// Encode this message as a bencoded datagram.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.clone().into_wire().to_bytes()?)
    }

    /// Decode a bencoded datagram.
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        Message::from_wire(internal::WireMessage::from_bytes(bytes.as_ref())?)
    }

    fn into_wire(self) -> internal::WireMessage {
        internal::WireMessage {
            message_id: self.message_id.0,
            contact: contact_into_wire(&self.contact),
            variant: match self.message_type {
                MessageType::Request(request) => {
                    internal::WireMessageVariant::Request(match request {
                        RequestSpecific::Ping => internal::WireRequestSpecific::Ping,
                        RequestSpecific::FindNode { key } => {
                            internal::WireRequestSpecific::FindNode {
                                arguments: internal::WireKeyArguments { key: *key.as_bytes() },
                            }
                        }
                        RequestSpecific::FindValue { key } => {
                            internal::WireRequestSpecific::FindValue {
                                arguments: internal::WireKeyArguments { key: *key.as_bytes() },
                            }
                        }
                        RequestSpecific::Store { token, values } => {
                            internal::WireRequestSpecific::Store {
                                arguments: internal::WireStoreArguments {
                                    token: token.0,
                                    values: values.iter().map(value_into_wire).collect(),
                                },
                            }
                        }
                    })
                }
                MessageType::Response(response) => {
                    internal::WireMessageVariant::Response(match response {
                        ResponseSpecific::Pong { external_address } => {
                            internal::WireResponseSpecific::Pong {
                                arguments: internal::WirePongArguments {
                                    external_address: external_address.to_string(),
                                },
                            }
                        }
                        ResponseSpecific::Nodes { token, contacts } => {
                            internal::WireResponseSpecific::Nodes {
                                arguments: internal::WireNodesArguments {
                                    token: token.map(|token| token.0),
                                    nodes: contacts.iter().map(contact_into_wire).collect(),
                                },
                            }
                        }
                        ResponseSpecific::Values { values } => {
                            internal::WireResponseSpecific::Values {
                                arguments: internal::WireValuesArguments {
                                    values: values.iter().map(value_into_wire).collect(),
                                },
                            }
                        }
                        ResponseSpecific::StoreStatus { statuses } => {
                            internal::WireResponseSpecific::StoreStatus {
                                arguments: internal::WireStoreStatusArguments {
                                    statuses: statuses
                                        .iter()
                                        .map(|status| internal::WireStoreStatus {
                                            primary_key: *status.primary_key.as_bytes(),
                                            secondary_key: *status.secondary_key.as_bytes(),
                                            code: match status.code {
                                                StoreStatusCode::Ok => 0,
                                                StoreStatusCode::Error => 1,
                                            },
                                        })
                                        .collect(),
                                },
                            }
                        }
                    })
                }
            },
        }
    }

    fn from_wire(wire: internal::WireMessage) -> Result<Message> {
        Ok(Message {
            message_id: MessageId(wire.message_id),
            contact: contact_from_wire(wire.contact)?,
            message_type: match wire.variant {
                internal::WireMessageVariant::Request(request) => {
                    MessageType::Request(match request {
                        internal::WireRequestSpecific::Ping => RequestSpecific::Ping,
                        internal::WireRequestSpecific::FindNode { arguments } => {
                            RequestSpecific::FindNode {
                                key: Kuid::from_array(arguments.key),
                            }
                        }
                        internal::WireRequestSpecific::FindValue { arguments } => {
                            RequestSpecific::FindValue {
                                key: Kuid::from_array(arguments.key),
                            }
                        }
                        internal::WireRequestSpecific::Store { arguments } => {
                            RequestSpecific::Store {
                                token: SecurityToken(arguments.token),
                                values: arguments.values.into_iter().map(value_from_wire).collect(),
                            }
                        }
                    })
                }
                internal::WireMessageVariant::Response(response) => {
                    MessageType::Response(match response {
                        internal::WireResponseSpecific::Pong { arguments } => {
                            ResponseSpecific::Pong {
                                external_address: parse_address(&arguments.external_address)?,
                            }
                        }
                        internal::WireResponseSpecific::Nodes { arguments } => {
                            ResponseSpecific::Nodes {
                                token: arguments.token.map(SecurityToken),
                                contacts: arguments
                                    .nodes
                                    .into_iter()
                                    .map(contact_from_wire)
                                    .collect::<Result<Vec<_>>>()?,
                            }
                        }
                        internal::WireResponseSpecific::Values { arguments } => {
                            ResponseSpecific::Values {
                                values: arguments.values.into_iter().map(value_from_wire).collect(),
                            }
                        }
                        internal::WireResponseSpecific::StoreStatus { arguments } => {
                            ResponseSpecific::StoreStatus {
                                statuses: arguments
                                    .statuses
                                    .into_iter()
                                    .map(|status| StoreStatus {
                                        primary_key: Kuid::from_array(status.primary_key),
                                        secondary_key: Kuid::from_array(status.secondary_key),
                                        code: if status.code == 0 {
                                            StoreStatusCode::Ok
                                        } else {
                                            StoreStatusCode::Error
                                        },
                                    })
                                    .collect(),
                            }
                        }
                    })
                }
            },
        })
    }
}

const FLAG_FIREWALLED: u8 = 0x01;

fn contact_into_wire(contact: &Contact) -> internal::WireContact {
    internal::WireContact {
        id: *contact.id().as_bytes(),
        address: contact.address().to_string(),
        instance_id: contact.instance_id(),
        flags: if contact.is_firewalled() {
            FLAG_FIREWALLED
        } else {
            0
        },
    }
}

fn contact_from_wire(wire: internal::WireContact) -> Result<Contact> {
    Ok(Contact::new(Kuid::from_array(wire.id), parse_address(&wire.address)?)
        .with_instance_id(wire.instance_id)
        .with_firewalled(wire.flags & FLAG_FIREWALLED != 0))
}

fn value_into_wire(value: &DhtValue) -> internal::WireValue {
    internal::WireValue {
        primary_key: *value.primary_key.as_bytes(),
        secondary_key: *value.secondary_key.as_bytes(),
        value: value.value.to_vec(),
    }
}

fn value_from_wire(wire: internal::WireValue) -> DhtValue {
    DhtValue {
        primary_key: Kuid::from_array(wire.primary_key),
        secondary_key: Kuid::from_array(wire.secondary_key),
        value: Bytes::from(wire.value),
    }
}

fn parse_address(address: &str) -> Result<SocketAddr> {
    address
        .parse()
        .map_err(|_| Error::InvalidArgument("malformed socket address"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_accepts_matching_responses_only() {
        let pong = ResponseSpecific::Pong {
            external_address: ([127, 0, 0, 1], 1).into(),
        };
        let nodes = ResponseSpecific::Nodes {
            token: None,
            contacts: vec![],
        };
        let values = ResponseSpecific::Values { values: vec![] };

        assert!(RequestSpecific::Ping.accepts(&pong));
        assert!(!RequestSpecific::Ping.accepts(&nodes));

        let find_node = RequestSpecific::FindNode { key: Kuid::random() };
        assert!(find_node.accepts(&nodes));
        assert!(!find_node.accepts(&values));

        let find_value = RequestSpecific::FindValue { key: Kuid::random() };
        assert!(find_value.accepts(&nodes));
        assert!(find_value.accepts(&values));
        assert!(!find_value.accepts(&pong));
    }

    #[test]
    fn wire_form_preserves_nodes_response() {
        let sender = Contact::alive(Kuid::random(), ([10, 0, 0, 1], 6881).into(), 3, true);
        let contacts = vec![
            Contact::new(Kuid::random(), ([10, 0, 0, 2], 6882).into()),
            Contact::new(Kuid::random(), ([10, 0, 0, 3], 6883).into()).with_instance_id(9),
        ];

        let message = Message::response(
            MessageId::random(),
            sender.clone(),
            ResponseSpecific::Nodes {
                token: Some(SecurityToken::new(vec![1, 2, 3, 4])),
                contacts: contacts.clone(),
            },
        );

        let parsed = Message::from_bytes(message.to_bytes().unwrap()).unwrap();

        assert_eq!(parsed.message_id, message.message_id);
        assert_eq!(parsed.contact, sender);
        assert_eq!(parsed.contact.instance_id(), 3);
        assert!(parsed.contact.is_firewalled());
        assert_eq!(parsed.message_type, message.message_type);
    }

    #[test]
    fn wire_form_preserves_store_request() {
        let sender = Contact::alive(Kuid::random(), ([10, 0, 0, 1], 6881).into(), 0, false);
        let value = DhtValue::new(Kuid::random(), *sender.id(), Bytes::from_static(b"hello"));

        let message = Message::request(
            MessageId::random(),
            sender,
            RequestSpecific::Store {
                token: SecurityToken::new(vec![9, 9, 9, 9]),
                values: vec![value],
            },
        );

        let parsed = Message::from_bytes(message.to_bytes().unwrap()).unwrap();

        assert_eq!(parsed.message_type, message.message_type);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Message::from_bytes(b"not bencode").is_err());
    }
}
