//! Bulk-endpoint streaming to a single USB device
//!
//! Acquires a device by vendor/product id, opens its first interface, lists
//! the interface's pipes and streams a fixed frame to one of them at a fixed
//! cadence. Every acquired handle is released on the way out.

pub mod acquire;
pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod libusb;
pub mod pipes;
pub mod session;
pub mod stream;
pub mod teardown;
pub mod test_utils;

pub use backend::{BindError, BindStep, DeviceInterface, InterfaceInterface, UsbBackend};
pub use config::StreamerConfig;
pub use error::{BindStage, SessionError};
pub use frame::{Frame, FrameBuilder};
pub use session::{SessionOutcome, SessionPlan, run_session};
pub use stream::{Pacer, ThreadSleep};
