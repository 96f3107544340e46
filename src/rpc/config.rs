use std::net::IpAddr;
use std::time::Duration;

use crate::common::{Kuid, DEFAULT_MAX_FAILURES, MAX_BUCKET_SIZE_K};

/// Default timeout of a request to a contact we have no round trip time for.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Lower bound of the adaptive request timeout.
pub const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(250);
/// Default number of concurrent requests of a lookup, also known as alpha.
pub const DEFAULT_PARALLELISM: usize = 4;

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// This node's id.
    ///
    /// Defaults to None, where a random id is generated.
    pub id: Option<Kuid>,
    /// Explicit port to listen on, used by [crate::DhtBuilder].
    ///
    /// Defaults to None, where the OS picks a port.
    pub port: Option<u16>,
    /// Address to listen on, used by [crate::DhtBuilder].
    ///
    /// Defaults to None, meaning `0.0.0.0`.
    pub bind_address: Option<IpAddr>,
    /// A firewalled node does not answer requests and does not get added
    /// to other nodes' routing tables.
    ///
    /// Defaults to false
    pub firewalled: bool,

    /// Replication parameter, the size of buckets and of lookup results.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub k: usize,
    /// Defaults to [DEFAULT_PARALLELISM]
    pub find_node_parallelism: usize,
    /// Defaults to [DEFAULT_PARALLELISM]
    pub find_value_parallelism: usize,
    /// Concurrent STORE requests of a single store operation.
    ///
    /// Defaults to 4
    pub parallel_stores: usize,

    /// Timeout of requests to contacts without a known round trip time,
    /// and the upper bound of the adaptive timeout.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Defaults to [MIN_REQUEST_TIMEOUT]
    pub min_request_timeout: Duration,

    /// How often a stalled lookup is checked.
    ///
    /// Defaults to 1 second
    pub boost_frequency: Duration,
    /// A lookup that heard nothing for this long sends an extra request.
    ///
    /// Defaults to 3 seconds
    pub boost_timeout: Duration,
    /// Keep querying until no contacts are left instead of stopping once
    /// the k closest stop improving.
    ///
    /// Defaults to false
    pub exhaustive: bool,
    /// Pick the next contact to query at random among the k closest candidates.
    ///
    /// Defaults to false
    pub randomize: bool,
    /// Count FIND_NODE responses without contacts as responses.
    ///
    /// Defaults to true
    pub accept_empty_find_node_responses: bool,
    /// Minimal share of routable contacts in a response for it to be used.
    ///
    /// Defaults to 0.5
    pub contacts_scrubber_required_ratio: f32,

    /// Forward our values to new contacts close to them.
    ///
    /// Defaults to true
    pub store_forward: bool,
    /// Delete values once new contacts push us out of the k closest.
    ///
    /// Defaults to false
    pub delete_value_if_furthest_node: bool,

    /// How many response message ids are remembered to reject replays.
    ///
    /// Defaults to 512
    pub response_history_size: usize,
    /// Inbound messages handled per [super::Rpc::tick].
    ///
    /// Defaults to 64
    pub max_messages_per_tick: usize,
    /// Buckets untouched for this long are refreshed with a lookup.
    ///
    /// Defaults to 30 minutes
    pub bucket_refresh_period: Duration,
    /// Unanswered requests after which a contact is considered dead.
    ///
    /// Defaults to [DEFAULT_MAX_FAILURES]
    pub max_contact_failures: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: None,
            port: None,
            bind_address: None,
            firewalled: false,

            k: MAX_BUCKET_SIZE_K,
            find_node_parallelism: DEFAULT_PARALLELISM,
            find_value_parallelism: DEFAULT_PARALLELISM,
            parallel_stores: 4,

            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            min_request_timeout: MIN_REQUEST_TIMEOUT,

            boost_frequency: Duration::from_secs(1),
            boost_timeout: Duration::from_secs(3),
            exhaustive: false,
            randomize: false,
            accept_empty_find_node_responses: true,
            contacts_scrubber_required_ratio: 0.5,

            store_forward: true,
            delete_value_if_furthest_node: false,

            response_history_size: 512,
            max_messages_per_tick: 64,
            bucket_refresh_period: Duration::from_secs(30 * 60),
            max_contact_failures: DEFAULT_MAX_FAILURES,
        }
    }
}
