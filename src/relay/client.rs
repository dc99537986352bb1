use axum::extract::ws::Message;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::relay::connection::ConnectionHandle;
use crate::relay::protocol::{ErrorCode, RequestPacket, ResponsePacket};
use crate::relay::registry::{
    BinaryRoute, ConnectionState, CreateError, JoinError, Joined, Registry,
};

/// The router for a single connection.
///
/// Every inbound frame is dispatched here against the shared registry. A
/// connection is either outside any room or inside exactly one; which of
/// the two it is lives in the registry, so the indices the router acts on
/// can never go stale. Each registry call runs under the lock as one
/// atomic step; the frames it decides to send go out only after the lock
/// is released, from the snapshot captured inside.
///
/// Every frame ends in exactly one of three ways: a response, a registry
/// mutation (possibly with notifications), or a silent drop. No protocol
/// error closes the connection.
pub struct Client {
    handle: ConnectionHandle,
}

impl Client {
    pub fn new(handle: ConnectionHandle) -> Client {
        Client { handle }
    }

    /// Dispatches one inbound frame.
    pub async fn handle_message(&self, registry: &RwLock<Registry>, message: Message) {
        match message {
            Message::Text(text) => {
                let Some(packet) = RequestPacket::decode(&text) else {
                    trace!("dropping unrecognized text frame from {}", self.handle.id());
                    return;
                };

                match packet {
                    RequestPacket::Create { size } => self.handle_create(registry, size).await,
                    RequestPacket::Join { id } => self.handle_join(registry, &id).await,
                }
            }
            Message::Binary(data) => self.handle_binary(registry, data).await,
            Message::Ping(_) | Message::Pong(_) => {
                trace!("keepalive frame from {}", self.handle.id());
            }
            Message::Close(_) => {
                debug!("close frame from {}", self.handle.id());
                self.handle_close(registry).await;
            }
        }
    }

    async fn handle_create(&self, registry: &RwLock<Registry>, size: Option<i64>) {
        let outcome = registry.write().await.create_room(&self.handle, size);

        match outcome {
            Ok(id) => self.send_packet(ResponsePacket::Create { id }),
            Err(CreateError::InvalidSize) => self.send_error(ErrorCode::InvalidSize),
            Err(CreateError::AlreadyExists) => self.send_error(ErrorCode::AlreadyExists),
            Err(CreateError::AlreadyInRoom) => {
                debug!(
                    "ignoring create from {} while already in a room",
                    self.handle.id()
                );
            }
        }
    }

    async fn handle_join(&self, registry: &RwLock<Registry>, room_id: &str) {
        let outcome = registry.write().await.join_room(&self.handle, room_id);

        match outcome {
            Ok(Joined {
                index,
                prior_size,
                notify,
            }) => {
                debug!(
                    "connection {} joined room {room_id} at index {index}",
                    self.handle.id()
                );

                self.send_packet(ResponsePacket::Join {
                    size: Some(prior_size),
                });

                let notification = ResponsePacket::Join { size: None }.encode();
                for peer in notify {
                    peer.send_text(notification.clone());
                }
            }
            Err(JoinError::DoesNotExist) => self.send_error(ErrorCode::DoesNotExist),
            Err(JoinError::IsFull) => self.send_error(ErrorCode::IsFull),
            Err(JoinError::AlreadyInRoom) => {
                debug!(
                    "ignoring join from {} while already in a room",
                    self.handle.id()
                );
            }
        }
    }

    /// Routes a binary frame by its leading byte, rewriting that byte to
    /// the sender's index before delivery.
    async fn handle_binary(&self, registry: &RwLock<Registry>, mut data: Vec<u8>) {
        // No routing byte, nothing to do.
        if data.is_empty() {
            return;
        }

        let route = {
            let registry = registry.read().await;
            match registry.state_of(self.handle.id()) {
                ConnectionState::Outside => return,
                ConnectionState::Inside { .. } => {
                    registry.route_binary(self.handle.id(), data[0])
                }
            }
        };

        match route {
            Some(BinaryRoute::Unicast { target, source }) => {
                data[0] = source;
                target.send_binary(data);
            }
            Some(BinaryRoute::Broadcast { targets, source }) => {
                data[0] = source;
                for peer in targets {
                    peer.send_binary(data.clone());
                }
            }
            // The routing byte named an index past the end of the room.
            None => {}
        }
    }

    /// Reconciles the registry after the connection is gone and tells the
    /// remaining room members. Safe to run more than once; only the first
    /// run finds anything to do.
    pub async fn handle_close(&self, registry: &RwLock<Registry>) {
        let departure = registry.write().await.handle_disconnect(self.handle.id());

        if let Some(departure) = departure {
            debug!(
                "notifying {} member(s) of room {} that index {} departed",
                departure.remaining.len(),
                departure.room_id,
                departure.index
            );

            let notification = ResponsePacket::Leave {
                index: departure.index,
            }
            .encode();
            for peer in departure.remaining {
                peer.send_text(notification.clone());
            }
        }
    }

    fn send_packet(&self, packet: ResponsePacket) {
        self.handle.send_text(packet.encode());
    }

    fn send_error(&self, message: ErrorCode) {
        self.send_packet(ResponsePacket::Error { message });
    }
}
