//! Sanity checks on contact lists returned by other nodes.

use std::collections::HashSet;

use tracing::debug;

use crate::common::{Contact, Kuid};

#[derive(Debug, Clone, Default)]
pub struct Scrubbed {
    /// Contacts worth querying.
    pub contacts: Vec<Contact>,
    /// Contacts claiming the local node's id from another address.
    pub collisions: Vec<Contact>,
    /// `false` if too many of the returned contacts were unusable.
    pub valid: bool,
}

/// Filters the `contacts` that `src` sent us.
///
/// Duplicates, the local node and `src` itself are dropped silently, contacts
/// with unroutable addresses count against `required_ratio`.
pub fn scrub(local: &Contact, src: &Contact, contacts: &[Contact], required_ratio: f32) -> Scrubbed {
    let mut scrubbed = Scrubbed::default();
    let mut seen: HashSet<Kuid> = HashSet::with_capacity(contacts.len());
    let mut invalid = 0_usize;

    for contact in contacts {
        if !seen.insert(*contact.id()) {
            continue;
        }

        if contact.id() == local.id() {
            if contact.address() != local.address() {
                scrubbed.collisions.push(contact.clone());
            }
            continue;
        }

        if contact.id() == src.id() {
            continue;
        }

        if !contact.has_valid_address() {
            invalid += 1;
            continue;
        }

        scrubbed.contacts.push(contact.clone());
    }

    scrubbed.valid = if contacts.is_empty() {
        true
    } else {
        let ratio = (contacts.len() - invalid) as f32 / contacts.len() as f32;
        ratio >= required_ratio
    };

    if !scrubbed.valid {
        debug!(?src, invalid, total = contacts.len(), "Rejecting contacts");
    }

    scrubbed
}
