//! Media plane coordination.
//!
//! - [`engine`] - the [`MediaEngine`] trait the controller drives
//! - [`local`] - in-process engine used by the binary and tests
//! - [`room`] - per-meeting resource index ([`MediaRoom`])

pub mod engine;
pub mod local;
pub mod room;

pub use engine::{
    EngineConsumer, EngineError, EngineProducer, MediaEngine, RouterInfo, TransportParams,
};
pub use local::LocalMediaEngine;
pub use room::{ConsumerInfo, JoinKind, MediaRoom, ProducerInfo, RoomSnapshot};
