//! Bookkeeping for pool members
//!
//! The registry is plain data: it never blocks, never runs the factory and
//! never logs. [`Pool`](crate::Pool) owns one behind its single mutex and
//! drives every transition through the methods here.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a pooled resource.
///
/// Two structurally equal resources are still distinct members; the pool
/// tracks and replaces them by this id only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Token holding a slot while its resource is created outside the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Reservation(u64);

/// Key of one scoped acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ScopeKey(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Member {
    Reserved(Reservation),
    Ready(ResourceId),
}

enum Slot<T> {
    Reserved(Reservation),
    Ready { id: ResourceId, resource: Arc<T> },
}

impl<T> Slot<T> {
    fn member(&self) -> Member {
        match self {
            Slot::Reserved(token) => Member::Reserved(*token),
            Slot::Ready { id, .. } => Member::Ready(*id),
        }
    }
}

/// Result of trying to obtain a resource under the lock
pub(crate) enum Acquire<T> {
    Idle(ResourceId, Arc<T>),
    Reserved(Reservation),
    Full,
}

pub(crate) struct Registry<T> {
    /// Every member in creation order
    all: Vec<Slot<T>>,
    /// Members currently handed out, in checkout order
    checked_out: Vec<Member>,
    /// Scope key -> resource currently backing that scope
    scopes: HashMap<ScopeKey, ResourceId>,
    next_id: u64,
    capacity: usize,
}

impl<T> Registry<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            all: Vec::with_capacity(capacity),
            checked_out: Vec::with_capacity(capacity),
            scopes: HashMap::new(),
            next_id: 1,
            capacity,
        }
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn is_checked_out(&self, member: Member) -> bool {
        self.checked_out.contains(&member)
    }

    /// Hand out an idle resource, or reserve a slot, or report a full pool.
    ///
    /// Idle resources rejected by `validate` are dropped from the pool and
    /// handed back in `evicted` for closing; the freed slots are reusable at
    /// once.
    pub fn acquire(
        &mut self,
        validate: Option<fn(&T) -> bool>,
        evicted: &mut Vec<(ResourceId, Arc<T>)>,
    ) -> Acquire<T> {
        loop {
            let idle = self.all.iter().find_map(|slot| match slot {
                Slot::Ready { id, resource } if !self.is_checked_out(Member::Ready(*id)) => {
                    Some((*id, Arc::clone(resource)))
                }
                _ => None,
            });

            match idle {
                Some((id, resource)) => {
                    if let Some(valid) = validate
                        && !valid(&resource)
                    {
                        self.all.retain(|slot| slot.member() != Member::Ready(id));
                        evicted.push((id, resource));
                        continue;
                    }
                    self.checked_out.push(Member::Ready(id));
                    return Acquire::Idle(id, resource);
                }
                None if self.all.len() < self.capacity => {
                    let token = Reservation(self.next());
                    self.all.push(Slot::Reserved(token));
                    self.checked_out.push(Member::Reserved(token));
                    return Acquire::Reserved(token);
                }
                None => return Acquire::Full,
            }
        }
    }

    /// Swap a reservation for its freshly created resource, keeping the slot
    pub fn fulfil(&mut self, token: Reservation, resource: Arc<T>) -> Option<ResourceId> {
        let index = self
            .all
            .iter()
            .position(|slot| slot.member() == Member::Reserved(token))?;
        let id = ResourceId(self.next());
        self.all[index] = Slot::Ready { id, resource };
        if let Some(held) = self
            .checked_out
            .iter_mut()
            .find(|held| **held == Member::Reserved(token))
        {
            *held = Member::Ready(id);
        }
        Some(id)
    }

    /// Drop a reservation whose resource could not be created
    pub fn cancel(&mut self, token: Reservation) {
        self.all.retain(|slot| slot.member() != Member::Reserved(token));
        self.checked_out.retain(|held| *held != Member::Reserved(token));
    }

    /// Return a resource. Unknown or idle ids are ignored.
    ///
    /// A scope backed by the returned resource no longer owns it.
    pub fn checkin(&mut self, id: ResourceId) -> bool {
        let before = self.checked_out.len();
        self.checked_out.retain(|held| *held != Member::Ready(id));
        let returned = before != self.checked_out.len();
        if returned {
            self.scopes.retain(|_, current| *current != id);
        }
        returned
    }

    /// Forget a resource entirely, including any scope it backs
    pub fn remove(&mut self, id: ResourceId) -> bool {
        let before = self.all.len();
        self.all.retain(|slot| slot.member() != Member::Ready(id));
        self.checked_out.retain(|held| *held != Member::Ready(id));
        self.scopes.retain(|_, current| *current != id);
        before != self.all.len()
    }

    /// Replace a checked-out resource in place.
    ///
    /// Returns `None` when `old` is not checked out; nothing changes then.
    pub fn replace(&mut self, old: ResourceId, resource: Arc<T>) -> Option<ResourceId> {
        let held = self
            .checked_out
            .iter()
            .position(|held| *held == Member::Ready(old))?;
        let slot = self
            .all
            .iter()
            .position(|slot| slot.member() == Member::Ready(old))?;

        let id = ResourceId(self.next());
        self.checked_out[held] = Member::Ready(id);
        self.all[slot] = Slot::Ready { id, resource };
        for current in self.scopes.values_mut() {
            if *current == old {
                *current = id;
            }
        }
        Some(id)
    }

    pub fn open_scope(&mut self, id: ResourceId) -> ScopeKey {
        let key = ScopeKey(self.next());
        self.scopes.insert(key, id);
        key
    }

    /// Resource currently backing a scope
    pub fn scope(&self, key: ScopeKey) -> Option<ResourceId> {
        self.scopes.get(&key).copied()
    }

    pub fn close_scope(&mut self, key: ScopeKey) -> Option<ResourceId> {
        self.scopes.remove(&key)
    }

    pub fn resource(&self, id: ResourceId) -> Option<Arc<T>> {
        self.all.iter().find_map(|slot| match slot {
            Slot::Ready { id: current, resource } if *current == id => Some(Arc::clone(resource)),
            _ => None,
        })
    }

    /// Live resources in creation order
    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &T)> {
        self.all.iter().filter_map(|slot| match slot {
            Slot::Ready { id, resource } => Some((*id, resource.as_ref())),
            Slot::Reserved(_) => None,
        })
    }

    pub fn checked_out_ids(&self) -> Vec<ResourceId> {
        self.checked_out
            .iter()
            .filter_map(|held| match held {
                Member::Ready(id) => Some(*id),
                Member::Reserved(_) => None,
            })
            .collect()
    }

    pub fn total(&self) -> usize {
        self.all.len()
    }

    pub fn checked_out(&self) -> usize {
        self.checked_out.len()
    }

    pub fn reserved(&self) -> usize {
        self.all
            .iter()
            .filter(|slot| matches!(slot, Slot::Reserved(_)))
            .count()
    }

    pub fn scopes(&self) -> usize {
        self.scopes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// One-line dump of the bookkeeping for debug logs
    pub fn dump(&self) -> String {
        let members = |members: &mut dyn Iterator<Item = Member>| {
            members
                .map(|member| match member {
                    Member::Ready(id) => id.to_string(),
                    Member::Reserved(_) => "reserved".to_string(),
                })
                .collect::<Vec<_>>()
                .join(",")
        };
        let all = members(&mut self.all.iter().map(Slot::member));
        let checked_out = members(&mut self.checked_out.iter().copied());
        let scopes = self
            .scopes
            .values()
            .map(ResourceId::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("all=[{all}] checked_out=[{checked_out}] scopes=[{scopes}]")
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        assert!(self.all.len() <= self.capacity);
        for held in &self.checked_out {
            assert!(self.all.iter().any(|slot| slot.member() == *held));
        }
        for (i, slot) in self.all.iter().enumerate() {
            assert!(self.all[i + 1..].iter().all(|other| other.member() != slot.member()));
        }
        for id in self.scopes.values() {
            assert!(self.is_checked_out(Member::Ready(*id)));
        }
    }
}
