//! The bounded channel background tasks use to post events to the driver.
//!
//! Nothing here runs consensus logic; it only carries what was observed off
//! the driver thread so `Engine::tick()` can apply it synchronously
//! (spec.md §5: "all mutations occur on the driver thread").

use crate::membership::NodeId;
use crate::transport::frame::Frame;
use crate::transport::hub::Direction;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    FrameReceived { peer_id: NodeId, direction: Direction, frame: Frame },
    SessionUp { peer_id: NodeId },
    SessionDown { peer_id: NodeId },
}
