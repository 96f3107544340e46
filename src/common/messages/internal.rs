use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireMessage {
    #[serde(rename = "t", with = "serde_bytes")]
    pub message_id: [u8; 16],

    #[serde(rename = "c")]
    pub contact: WireContact,

    #[serde(flatten)]
    pub variant: WireMessageVariant,
}

impl WireMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<WireMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub enum WireMessageVariant {
    #[serde(rename = "q")]
    Request(WireRequestSpecific),

    #[serde(rename = "r")]
    Response(WireResponseSpecific),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireContact {
    #[serde(rename = "i", with = "serde_bytes")]
    pub id: [u8; 20],

    #[serde(rename = "a")]
    pub address: String,

    #[serde(rename = "n")]
    pub instance_id: u8,

    #[serde(rename = "f")]
    pub flags: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireValue {
    #[serde(rename = "k", with = "serde_bytes")]
    pub primary_key: [u8; 20],

    #[serde(rename = "s", with = "serde_bytes")]
    pub secondary_key: [u8; 20],

    #[serde(rename = "v", with = "serde_bytes")]
    pub value: Vec<u8>,
}

// === Requests ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum WireRequestSpecific {
    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "find_node")]
    FindNode {
        #[serde(rename = "a")]
        arguments: WireKeyArguments,
    },

    #[serde(rename = "find_value")]
    FindValue {
        #[serde(rename = "a")]
        arguments: WireKeyArguments,
    },

    #[serde(rename = "store")]
    Store {
        #[serde(rename = "a")]
        arguments: WireStoreArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireKeyArguments {
    #[serde(rename = "k", with = "serde_bytes")]
    pub key: [u8; 20],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireStoreArguments {
    #[serde(with = "serde_bytes")]
    pub token: Vec<u8>,

    pub values: Vec<WireValue>,
}

// === Responses ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "r")]
pub enum WireResponseSpecific {
    #[serde(rename = "pong")]
    Pong {
        #[serde(rename = "a")]
        arguments: WirePongArguments,
    },

    #[serde(rename = "nodes")]
    Nodes {
        #[serde(rename = "a")]
        arguments: WireNodesArguments,
    },

    #[serde(rename = "values")]
    Values {
        #[serde(rename = "a")]
        arguments: WireValuesArguments,
    },

    #[serde(rename = "store")]
    StoreStatus {
        #[serde(rename = "a")]
        arguments: WireStoreStatusArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WirePongArguments {
    #[serde(rename = "ip")]
    pub external_address: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireNodesArguments {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(with = "serde_bytes")]
    pub token: Option<Vec<u8>>,

    pub nodes: Vec<WireContact>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireValuesArguments {
    pub values: Vec<WireValue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireStoreStatusArguments {
    pub statuses: Vec<WireStoreStatus>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireStoreStatus {
    #[serde(rename = "k", with = "serde_bytes")]
    pub primary_key: [u8; 20],

    #[serde(rename = "s", with = "serde_bytes")]
    pub secondary_key: [u8; 20],

    #[serde(rename = "c")]
    pub code: u8,
}
