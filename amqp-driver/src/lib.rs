//! Drives the links of an AMQP 1.0 connection described declaratively.
//!
//! A [`Coordinator`] dials one connection, opens the configured sessions and runs every sender
//! and receiver link as its own task until the input ends, a link fails or the run is
//! cancelled.
pub mod amqp;

mod coordinator;
pub use coordinator::{Coordinator, Run, RunReport, Settings};

pub mod error;
pub use error::{DriverError, ErrorScope};

mod input;
pub use input::{InputRouter, LineStream};

pub mod link;
pub use link::{LinkOutcome, LinkReport, LinkState, Received, GREETING};

pub mod memory;

mod model;
pub use model::{Authentication, ConnectionSpec, DriverConfig, LinkLabel, LinkSpec, Role, SessionSpec, DEFAULT_CREDIT};

mod session;

pub mod transport;
