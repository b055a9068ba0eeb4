//! Connect/message/disconnect handlers. Every handler runs its registry reads,
//! mutations and emits under one registry lock, so two connections arriving at
//! the same time can never claim the same queue head.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::protocol::{ChatPayload, ConnectPayload, ServerEvent};
use crate::registry::{Registry, RegistryError};
use crate::transport::Transport;
use crate::types::{ConnId, PublicKey};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("connect event carried no usable public key")]
    MalformedConnect,
    #[error("event is missing required field `{0}`")]
    BadRequest(&'static str),
    #[error("registry invariant violated: {0}")]
    InvariantViolation(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// No peer was waiting; the connection is now at the back of the queue.
    Queued,
    /// Paired with the oldest waiting connection.
    Paired { partner: ConnId },
    /// The connection was already queued or paired; only its key was replaced.
    KeyRefreshed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Unpaired,
    NoPartner,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Unpaired => "unpaired",
            DropReason::NoPartner => "no_partner",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Relayed { to: ConnId },
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    PartnerNotified { partner: ConnId },
    Dequeued,
    Idle,
}

/// Matches waiting connections in arrival order and relays chat between pairs.
pub struct PairingEngine<T: Transport> {
    registry: Arc<Registry>,
    transport: Arc<T>,
}

impl<T: Transport> Clone for PairingEngine<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> PairingEngine<T> {
    pub fn new(registry: Arc<Registry>, transport: Arc<T>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn on_connect(
        &self,
        id: ConnId,
        payload: ConnectPayload,
    ) -> Result<ConnectOutcome, EngineError> {
        let key = payload
            .public_key
            .and_then(PublicKey::parse)
            .ok_or(EngineError::MalformedConnect)?;

        let mut state = self.registry.lock();

        if state.is_queued(id) || state.partner_of(id).is_some() {
            state.register_key(id, key);
            debug!(conn_id = %id, "replaced public key of registered connection");
            return Ok(ConnectOutcome::KeyRefreshed);
        }

        let Some(other) = state.peek_front() else {
            state.register_key(id, key);
            state.enqueue(id);
            debug!(conn_id = %id, "no peer waiting; connection queued");
            return Ok(ConnectOutcome::Queued);
        };

        let Some(other_key) = state.key_of(other).cloned() else {
            return Err(invariant_violation(id, RegistryError::MissingKey(other)));
        };
        // pair() also takes `other` off the queue.
        if let Err(err) = state.pair(id, other) {
            return Err(invariant_violation(id, err));
        }
        state.register_key(id, key.clone());

        self.emit(
            id,
            ServerEvent::Connected {
                public_key: other_key.into_inner(),
            },
        );
        self.emit(
            other,
            ServerEvent::Connected {
                public_key: key.into_inner(),
            },
        );
        drop(state);

        debug!(conn_id = %id, partner = %other, "paired connections");
        Ok(ConnectOutcome::Paired { partner: other })
    }

    pub fn on_message(
        &self,
        id: ConnId,
        payload: ChatPayload,
    ) -> Result<MessageOutcome, EngineError> {
        let state = self.registry.lock();

        if state.is_queued(id) {
            return Ok(MessageOutcome::Dropped(DropReason::Unpaired));
        }

        let message = payload.message.ok_or(EngineError::BadRequest("message"))?;

        match state.partner_of(id) {
            Some(partner) => {
                self.emit(partner, ServerEvent::Chat { message });
                Ok(MessageOutcome::Relayed { to: partner })
            }
            None => Ok(MessageOutcome::Dropped(DropReason::NoPartner)),
        }
    }

    pub fn on_disconnect(&self, id: ConnId) -> DisconnectOutcome {
        let mut state = self.registry.lock();

        let outcome = if let Some(partner) = state.partner_of(id) {
            self.emit(partner, ServerEvent::PartnerDisconnected);
            state.unpair(id);
            DisconnectOutcome::PartnerNotified { partner }
        } else if state.is_queued(id) {
            state.remove_from_queue(id);
            DisconnectOutcome::Dequeued
        } else {
            DisconnectOutcome::Idle
        };
        state.forget_key(id);
        drop(state);

        debug!(conn_id = %id, outcome = ?outcome, "connection released");
        outcome
    }

    // Called with the registry lock held; transports must not block.
    fn emit(&self, to: ConnId, event: ServerEvent) {
        let name = event.name();
        if let Err(err) = self.transport.send(to, event) {
            warn!(conn_id = %to, event = name, error = %err, "failed to emit event");
        }
    }
}

fn invariant_violation(id: ConnId, err: RegistryError) -> EngineError {
    error!(conn_id = %id, error = %err, "dropping event after registry invariant violation");
    debug_assert!(false, "registry invariant violated: {err}");
    EngineError::InvariantViolation(err)
}
