//! Replication of locally held values to contacts that just joined near them.

use tracing::debug;

use crate::common::{Contact, Database, DhtValue, Kuid, RouteTable, SelectMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Send our values under the key to the new contact.
    Forward,
    /// We are no longer among the k closest, drop the values.
    Delete,
    Nothing,
}

/// Decides what to do with the values under `key` now that `trigger` showed up.
///
/// `nodes` are the k closest non-dead contacts to `key` as the routing table
/// saw them before `trigger` was added, `existing` is the routing table's
/// previous record of `trigger`.
pub fn decide(
    key: &Kuid,
    local: &Contact,
    trigger: &Contact,
    existing: Option<&Contact>,
    nodes: &[Contact],
    k: usize,
    delete_if_furthest: bool,
) -> Decision {
    let (Some(closest), Some(furthest)) = (nodes.first(), nodes.last()) else {
        return Decision::Nothing;
    };

    let local_is_closest = closest.id() == local.id();
    let trigger_displaced_local = closest.id() == trigger.id()
        && nodes.get(1).map(|second| second.id() == local.id()).unwrap_or(false);

    if local_is_closest || trigger_displaced_local {
        if nodes.len() < k
            || trigger.id() == furthest.id()
            || trigger.id().is_nearer_to(key, furthest.id())
        {
            return Decision::Forward;
        }
        return Decision::Nothing;
    }

    if delete_if_furthest
        && nodes.len() >= k
        && furthest.id() == local.id()
        && existing.map(Contact::is_dead).unwrap_or(true)
        && trigger.id().is_nearer_to(key, local.id())
    {
        return Decision::Delete;
    }

    Decision::Nothing
}

/// Runs [decide] for every key in `database`.
///
/// Values to delete are removed right away, values to forward are returned.
/// Call this before adding `trigger` to `route_table`, with the database lock held.
pub fn forward_values(
    route_table: &dyn RouteTable,
    database: &mut dyn Database,
    trigger: &Contact,
    k: usize,
    delete_if_furthest: bool,
) -> Vec<DhtValue> {
    let local = route_table.local_node();
    let existing = route_table.get(trigger.id());
    let mut forward = vec![];

    for key in database.key_set() {
        let nodes: Vec<Contact> = route_table
            .select(&key, k * 2, SelectMode::Known)
            .into_iter()
            .filter(|contact| !contact.is_dead())
            .take(k)
            .collect();

        match decide(&key, local, trigger, existing, &nodes, k, delete_if_furthest) {
            Decision::Forward => forward.extend(database.get(&key)),
            Decision::Delete => {
                for value in database.get(&key) {
                    database.remove(value.primary_key(), value.secondary_key());
                }
                debug!(?key, ?trigger, "Deleted values we are no longer close to");
            }
            Decision::Nothing => {}
        }
    }

    forward
}
