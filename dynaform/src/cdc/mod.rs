//! Change data capture runtime: the dispatcher that turns stream records into
//! broker events, and the consumer side that runs typed handlers with retry.

pub mod consumer;
pub mod dispatcher;
pub mod handlers;
pub mod stream;

pub use consumer::{
    enrich, react, reduce, retry, BrokerEvent, ChangeRecord, RawChange, RetryPolicy, Sleeper,
    ThreadSleeper,
};
pub use dispatcher::{Dispatcher, EventPublisher, MemoryPublisher, PublishedEvent};
pub use handlers::{Enricher, Reactor, Reducer, RuntimeContext};
pub use stream::{MutationKind, StreamEvent, StreamPayload, StreamRecord};
