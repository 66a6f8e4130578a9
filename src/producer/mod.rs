//! Produce/persist pipeline: the [`JobsProducer`] application contract and
//! the [`ProducerDriver`] that polls it on singleton intervals.

mod contract;
mod driver;

pub use contract::{JobsProducer, MarkProcessingOrder};
pub use driver::ProducerDriver;
