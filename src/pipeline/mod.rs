pub mod coordinator;
pub mod pump;
pub mod reconciler;
pub mod ringbuf;
pub mod session;
pub mod timing;

pub use coordinator::{Coordinator, DebounceTimer, RenderState, Renderer, Scene, TickOutcome, Tracker};
pub use pump::{FramePump, PumpState, Rearm};
pub use reconciler::{DetectionState, Reconciler};
pub use ringbuf::{FrameRingBuffer, RingStats};
pub use session::Session;
pub use timing::TimingRef;
