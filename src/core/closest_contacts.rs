use crate::common::{Contact, Kuid};

#[derive(Debug, Clone)]
/// Contacts sorted by XOR distance to a key, each carrying a payload `T`.
///
/// Contacts are unique by id. A bounded set drops its furthest contact on overflow.
pub struct ClosestContacts<T = ()> {
    key: Kuid,
    max: Option<usize>,
    entries: Vec<(Contact, T)>,
}

impl<T> ClosestContacts<T> {
    pub fn new(key: Kuid) -> Self {
        Self {
            key,
            max: None,
            entries: Vec::new(),
        }
    }

    pub fn bounded(key: Kuid, max: usize) -> Self {
        Self {
            key,
            max: Some(max),
            entries: Vec::with_capacity(max + 1),
        }
    }

    // === Getters ===

    pub fn key(&self) -> &Kuid {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&Contact> {
        self.entries.first().map(|(contact, _)| contact)
    }

    /// The furthest contact.
    pub fn last(&self) -> Option<&Contact> {
        self.entries.last().map(|(contact, _)| contact)
    }

    pub fn contains(&self, id: &Kuid) -> bool {
        self.entries.iter().any(|(contact, _)| contact.id() == id)
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.entries.iter().map(|(contact, _)| contact)
    }

    pub fn entries(&self) -> &[(Contact, T)] {
        &self.entries
    }

    // === Public Methods ===

    /// Inserts a contact at its place, returns `false` if its id is already present
    /// or it was immediately evicted for being too far.
    pub fn insert(&mut self, contact: Contact, payload: T) -> bool {
        let seek = contact.id().xor(&self.key);

        let position = match self
            .entries
            .binary_search_by(|(candidate, _)| candidate.id().xor(&self.key).cmp(&seek))
        {
            Ok(_) => return false,
            Err(position) => position,
        };

        self.entries.insert(position, (contact, payload));

        if let Some(max) = self.max {
            if self.entries.len() > max {
                self.entries.pop();
                return position < max;
            }
        }

        true
    }

    pub fn pop_first(&mut self) -> Option<(Contact, T)> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<(Contact, T)> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn contact(id: &str) -> Contact {
        Contact::new(id.parse().unwrap(), ([127, 0, 0, 1], 1).into())
    }

    #[test]
    fn sorted_and_unique() {
        let mut closest = ClosestContacts::new(Kuid::MINIMUM);

        assert!(closest.insert(contact("3000000000000000000000000000000000000000"), ()));
        assert!(closest.insert(contact("1000000000000000000000000000000000000000"), ()));
        assert!(closest.insert(contact("2000000000000000000000000000000000000000"), ()));
        assert!(!closest.insert(contact("2000000000000000000000000000000000000000"), ()));

        let ids: Vec<String> = closest.contacts().map(|c| c.id().to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "1000000000000000000000000000000000000000",
                "2000000000000000000000000000000000000000",
                "3000000000000000000000000000000000000000",
            ]
        );
    }

    #[test]
    fn bounded_drops_furthest() {
        let mut closest = ClosestContacts::bounded(Kuid::MINIMUM, 2);

        closest.insert(contact("3000000000000000000000000000000000000000"), ());
        closest.insert(contact("1000000000000000000000000000000000000000"), ());
        assert!(!closest.insert(contact("4000000000000000000000000000000000000000"), ()));
        assert!(closest.insert(contact("2000000000000000000000000000000000000000"), ()));

        assert_eq!(closest.len(), 2);
        assert_eq!(
            closest.last().unwrap().id().to_string(),
            "2000000000000000000000000000000000000000"
        );
    }
}
