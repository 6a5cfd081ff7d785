pub mod buffer;
pub mod controller;
pub mod events;
pub mod scheduler;
pub mod state;

pub use buffer::DetectionBuffer;
pub use controller::{
    CaptureSessionController, ControllerConfig, ControllerDeps, ResultDisposition,
    SessionSnapshot, DEFAULT_IDENTIFY_TIMEOUT,
};
pub use events::{EventBus, SessionEvent};
pub use scheduler::CaptureScheduler;
pub use state::{SessionPhase, SessionState};
