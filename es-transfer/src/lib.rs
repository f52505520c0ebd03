//! Elementary-stream transfer pipeline.
//!
//! Data flow:
//! ```text
//! feeder ──► PacketStorage ──► EsStream (audio) ──┐
//!             (one queue        ▲   decrypt?       ├──► EsSink (hardware decoder)
//!              per stream)      │   submit+retry   │
//!                               └─ EsStream (video)┘
//!                                      │
//!                        Synchronizer ◄┘ (pts pacing between streams)
//! ```
//!
//! Each [`stream::EsStream`] owns one background tokio task. Notifications
//! (buffering, reconfigure, playback error, packet processed) are broadcast
//! to every subscriber.

pub mod clock;
pub mod config;
pub mod drm;
pub mod error;
pub mod events;
pub mod packet;
pub mod settings;
pub mod sink;
pub mod storage;
pub mod stream;
pub mod sync;
pub mod types;

pub use clock::PlayerClock;
pub use config::{AudioConfig, StreamConfig, VideoConfig};
pub use drm::{DrmError, DrmSession};
pub use error::{EsError, Result};
pub use events::{EventStream, StreamEvent};
pub use packet::{Packet, PacketKind, PacketType};
pub use settings::TransferSettings;
pub use sink::{EsSink, SubmitStatus};
pub use storage::{Enqueue, PacketStorage};
pub use stream::{EngineState, EsStream};
pub use sync::Synchronizer;
pub use types::{Pts, StreamType};
