pub mod bootstrap;
pub mod clock;
pub mod engine;
pub mod guarded;
pub mod retry;

pub use bootstrap::{bootstrap, Application, BootstrapError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::RecognitionEngine;
pub use guarded::GuardedRecognition;
pub use retry::RetryPolicy;
