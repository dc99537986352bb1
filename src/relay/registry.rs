use std::collections::HashMap;
use std::fmt;

use tracing::debug;
use uuid::Uuid;

use crate::relay::connection::{ConnectionHandle, ConnectionId};
use crate::relay::room::Room;

/// The routing byte that addresses every other room member at once.
pub const BROADCAST: u8 = u8::MAX;

/// Produces a fresh room identifier for every call.
///
/// Injected so tests can force collisions; the default draws random v4
/// UUIDs, for which a collision is effectively unreachable.
pub type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Reverse-index entry: where a connection currently sits.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Membership {
    room_id: String,
    index: usize,
}

/// A connection is either outside any room or a member of exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Outside,
    Inside { room_id: String, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    /// The requested size was outside [1, 254].
    InvalidSize,
    /// The id generator produced an identifier that is already taken.
    /// Not retried; the collision surfaces to the client.
    AlreadyExists,
    /// The creator is already a member of a room. Dropped silently at the
    /// router; no error frame is defined for this condition.
    AlreadyInRoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    /// The given id names no room.
    DoesNotExist,
    /// The room's member count equals its capacity.
    IsFull,
    /// The joiner is already a member of a room; same silent-drop policy
    /// as [`CreateError::AlreadyInRoom`].
    AlreadyInRoom,
}

/// The result of a successful join, captured inside the critical section so
/// the caller can notify without going back to the registry.
#[derive(Debug)]
pub struct Joined {
    /// The new member's index.
    pub index: usize,
    /// How many members the room had just before the join.
    pub prior_size: usize,
    /// The members that were already present, in room order.
    pub notify: Vec<ConnectionHandle>,
}

/// The result of removing a disconnected member.
#[derive(Debug)]
pub struct Departure {
    pub room_id: String,
    /// The departed member's index just before removal.
    pub index: usize,
    /// The members left behind, already re-indexed. Empty when the room
    /// was destroyed with the departure.
    pub remaining: Vec<ConnectionHandle>,
}

/// Where a binary frame goes, decided in one atomic step.
#[derive(Debug)]
pub enum BinaryRoute {
    /// Deliver to a single member (possibly the sender itself).
    Unicast {
        target: ConnectionHandle,
        source: u8,
    },
    /// Deliver to every member except the sender.
    Broadcast {
        targets: Vec<ConnectionHandle>,
        source: u8,
    },
}

/// The authoritative in-memory state of rooms and their members.
///
/// `rooms` owns the rooms; `by_conn` maps every member connection to its
/// `(room, index)` so a disconnect locates its room in O(1). The two maps
/// are kept mutually consistent by every operation; all operations run
/// under one lock at the call site, so each is atomic with respect to
/// every other. None of them ever awaits. A disagreement between the two
/// maps is a programming bug and panics with a diagnostic instead of
/// being papered over.
pub struct Registry {
    rooms: HashMap<String, Room>,
    by_conn: HashMap<ConnectionId, Membership>,
    generate_id: IdGenerator,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::with_id_generator(Box::new(|| Uuid::new_v4().to_string()))
    }

    pub fn with_id_generator(generate_id: IdGenerator) -> Registry {
        Registry {
            rooms: HashMap::new(),
            by_conn: HashMap::new(),
            generate_id,
        }
    }

    /// Creates a room with `conn` as its only member and returns the new
    /// room's identifier.
    ///
    /// `requested_size` is the raw value from the `create` packet; absent
    /// means [`Room::DEFAULT_SIZE`].
    pub fn create_room(
        &mut self,
        conn: &ConnectionHandle,
        requested_size: Option<i64>,
    ) -> Result<String, CreateError> {
        if self.by_conn.contains_key(&conn.id()) {
            return Err(CreateError::AlreadyInRoom);
        }

        let capacity = match requested_size {
            None => Room::DEFAULT_SIZE,
            Some(size) if (1..=Room::MAX_SIZE as i64).contains(&size) => size as usize,
            Some(_) => return Err(CreateError::InvalidSize),
        };

        let room_id = (self.generate_id)();
        if self.rooms.contains_key(&room_id) {
            return Err(CreateError::AlreadyExists);
        }

        let mut room = Room::new(capacity);
        let index = room
            .try_add(conn.clone())
            .expect("a fresh room has a free slot");

        self.by_conn.insert(
            conn.id(),
            Membership {
                room_id: room_id.clone(),
                index,
            },
        );

        debug!(
            "connection {} created room {room_id} with capacity {}",
            conn.id(),
            room.capacity()
        );
        self.rooms.insert(room_id.clone(), room);

        Ok(room_id)
    }

    /// Appends `conn` to the room named `room_id`.
    ///
    /// On success the returned [`Joined`] carries everything needed to ack
    /// the joiner and notify the members that were already there.
    pub fn join_room(
        &mut self,
        conn: &ConnectionHandle,
        room_id: &str,
    ) -> Result<Joined, JoinError> {
        if self.by_conn.contains_key(&conn.id()) {
            return Err(JoinError::AlreadyInRoom);
        }

        let Some(room) = self.rooms.get_mut(room_id) else {
            return Err(JoinError::DoesNotExist);
        };

        let notify = room.members().to_vec();
        let index = room.try_add(conn.clone()).map_err(|_| JoinError::IsFull)?;

        self.by_conn.insert(
            conn.id(),
            Membership {
                room_id: room_id.to_string(),
                index,
            },
        );

        debug!("connection {} joined room {room_id} at index {index}", conn.id());
        Ok(Joined {
            index,
            prior_size: notify.len(),
            notify,
        })
    }

    /// Removes a disconnected connection from its room, if it was in one.
    ///
    /// Shifted members have their reverse-index entries rewritten in the
    /// same step, and a room whose last member departs is destroyed on the
    /// spot. Calling this for a connection that is in no room is a no-op,
    /// so double reconciliation (a close frame followed by the stream
    /// ending) is harmless.
    pub fn handle_disconnect(&mut self, conn: ConnectionId) -> Option<Departure> {
        let Membership { room_id, index } = self.by_conn.remove(&conn)?;

        let Some(room) = self.rooms.get_mut(&room_id) else {
            panic!("registry corrupted: {conn} maps to unknown room {room_id}");
        };
        assert!(
            index < room.len() && room.get(index).map(ConnectionHandle::id) == Some(conn),
            "registry corrupted: room {room_id} slot {index} does not hold {conn}",
        );

        room.remove_at(index);

        // Everyone behind the departed member moved down one slot.
        for (i, member) in room.members().iter().enumerate().skip(index) {
            match self.by_conn.get_mut(&member.id()) {
                Some(membership) => membership.index = i,
                None => panic!(
                    "registry corrupted: member {} of room {room_id} has no reverse entry",
                    member.id()
                ),
            }
        }

        let remaining = if room.is_empty() {
            self.rooms.remove(&room_id);
            debug!("room {room_id} destroyed");
            Vec::new()
        } else {
            room.members().to_vec()
        };

        debug!("connection {conn} left room {room_id} from index {index}");
        Some(Departure {
            room_id,
            index,
            remaining,
        })
    }

    /// The room and index a connection currently occupies, if any.
    pub fn lookup(&self, conn: ConnectionId) -> Option<(&str, usize)> {
        self.by_conn
            .get(&conn)
            .map(|membership| (membership.room_id.as_str(), membership.index))
    }

    pub fn state_of(&self, conn: ConnectionId) -> ConnectionState {
        match self.by_conn.get(&conn) {
            None => ConnectionState::Outside,
            Some(membership) => ConnectionState::Inside {
                room_id: membership.room_id.clone(),
                index: membership.index,
            },
        }
    }

    /// Decides where a binary frame from `conn` goes, reading the sender's
    /// index and the member snapshot in one step.
    ///
    /// Returns `None` when the sender is in no room or the routing byte
    /// names a member index past the end of the room; both are silent
    /// drops. `source` is the value the delivered frame's leading byte
    /// must be rewritten to.
    pub fn route_binary(&self, conn: ConnectionId, index_byte: u8) -> Option<BinaryRoute> {
        let (room_id, index) = self.lookup(conn)?;
        let Some(room) = self.rooms.get(room_id) else {
            panic!("registry corrupted: {conn} maps to unknown room {room_id}");
        };

        let source = u8::try_from(index).expect("member indices fit in the routing byte");

        if index_byte == BROADCAST {
            return Some(BinaryRoute::Broadcast {
                targets: room.members_except(index),
                source,
            });
        }

        let target = room.get(usize::from(index_byte))?.clone();
        Some(BinaryRoute::Unicast { target, source })
    }

    /// Audits every invariant the two indices promise each other.
    #[cfg(test)]
    pub fn check_consistency(&self) {
        for (conn, membership) in &self.by_conn {
            let room = self
                .rooms
                .get(&membership.room_id)
                .expect("reverse index names a live room");
            let member = room
                .get(membership.index)
                .expect("reverse index stays within bounds");
            assert_eq!(member.id(), *conn);
        }

        for (room_id, room) in &self.rooms {
            assert!(!room.is_empty(), "room {room_id} outlived its last member");
            assert!(room.len() <= room.capacity());
            assert!((1..=Room::MAX_SIZE).contains(&room.capacity()));
            for (index, member) in room.members().iter().enumerate() {
                let membership = self
                    .by_conn
                    .get(&member.id())
                    .expect("every member has a reverse entry");
                assert_eq!(membership.room_id, *room_id);
                assert_eq!(membership.index, index);
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("rooms", &self.rooms)
            .field("by_conn", &self.by_conn)
            .finish_non_exhaustive()
    }
}
