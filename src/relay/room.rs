use crate::relay::connection::ConnectionHandle;

/// Returned by [`Room::try_add`] when the room is at capacity.
#[derive(Debug, PartialEq, Eq)]
pub struct RoomFull;

/// An ordered, capacity-bounded list of connections.
///
/// A member's index is its current position in the list. Indices are not
/// stable across departures: removing the member at position `k` shifts
/// every later member down by one. The registry is responsible for keeping
/// its reverse index in step with those shifts.
#[derive(Debug)]
pub struct Room {
    members: Vec<ConnectionHandle>,
    capacity: usize,
}

impl Room {
    /// The capacity a room gets when `create` carries no `size` field.
    pub const DEFAULT_SIZE: usize = 2;

    /// The largest allowed capacity. Member indices must fit in the single
    /// routing byte, and 255 is reserved for broadcast.
    pub const MAX_SIZE: usize = 254;

    /// Creates an empty room. Capacity is fixed for the room's lifetime;
    /// the registry validates it before construction.
    pub fn new(capacity: usize) -> Room {
        debug_assert!((1..=Room::MAX_SIZE).contains(&capacity));

        Room {
            members: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ConnectionHandle> {
        self.members.get(index)
    }

    pub fn members(&self) -> &[ConnectionHandle] {
        &self.members
    }

    /// Appends a member and returns its index, or `RoomFull` without
    /// mutating anything.
    pub fn try_add(&mut self, member: ConnectionHandle) -> Result<usize, RoomFull> {
        if self.members.len() >= self.capacity {
            return Err(RoomFull);
        }

        debug_assert!(self.members.iter().all(|m| m.id() != member.id()));

        self.members.push(member);
        Ok(self.members.len() - 1)
    }

    /// Removes the member at `index`, shifting every later member down by
    /// one, and returns the evicted handle. The caller must rewrite the
    /// reverse index entries of all shifted members in the same step.
    pub fn remove_at(&mut self, index: usize) -> ConnectionHandle {
        self.members.remove(index)
    }

    /// Snapshot of every member except the one at `index`, in room order.
    /// Used to fan frames out without holding on to the room itself.
    pub fn members_except(&self, index: usize) -> Vec<ConnectionHandle> {
        self.members
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, member)| member.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> ConnectionHandle {
        ConnectionHandle::new().0
    }

    #[test]
    fn fills_up_to_capacity() {
        let mut room = Room::new(2);

        assert_eq!(room.try_add(member()), Ok(0));
        assert_eq!(room.try_add(member()), Ok(1));
        assert_eq!(room.try_add(member()), Err(RoomFull));
        assert_eq!(room.len(), 2);
        assert_eq!(room.capacity(), 2);
    }

    #[test]
    fn removal_shifts_the_tail_down() {
        let mut room = Room::new(4);
        let (a, b, c) = (member(), member(), member());
        room.try_add(a.clone()).unwrap();
        room.try_add(b.clone()).unwrap();
        room.try_add(c.clone()).unwrap();

        let evicted = room.remove_at(0);
        assert_eq!(evicted.id(), a.id());
        assert_eq!(room.get(0).unwrap().id(), b.id());
        assert_eq!(room.get(1).unwrap().id(), c.id());
        assert!(room.get(2).is_none());
    }

    #[test]
    fn members_except_skips_one_position() {
        let mut room = Room::new(3);
        let (a, b, c) = (member(), member(), member());
        room.try_add(a.clone()).unwrap();
        room.try_add(b.clone()).unwrap();
        room.try_add(c.clone()).unwrap();

        let others: Vec<_> = room.members_except(1).iter().map(|m| m.id()).collect();
        assert_eq!(others, vec![a.id(), c.id()]);
    }
}
