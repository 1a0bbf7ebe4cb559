//! Common data types for Roomcast components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random id
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Unique identifier for a peer, stable across reconnects
    PeerId
);

id_type!(
    /// Unique identifier for a room
    RoomId
);

id_type!(
    /// Unique identifier for one physical signaling or control channel
    ConnectionId
);

id_type!(
    /// Unique identifier for a router (per-room, per-node media switch)
    RouterId
);

id_type!(
    /// Unique identifier for a pipe transport (one half of a router bridge)
    PipeTransportId
);

id_type!(
    /// Unique identifier for a relayed data consumer
    DataConsumerId
);

id_type!(
    /// Unique identifier for a data producer
    DataProducerId
);

id_type!(
    /// Unique identifier for a peer-owned media transport
    TransportId
);

id_type!(
    /// Unique identifier for a media producer
    ProducerId
);

id_type!(
    /// Unique identifier for a media consumer
    ConsumerId
);
