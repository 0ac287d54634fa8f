//! Domain events and the pub/sub mechanics used to distribute them.
//!
//! The workflow engine publishes milestone events (submitted, approved,
//! rejected, paid, ...) here after a transaction commits; notification and
//! audit collaborators subscribe without being part of the core.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
