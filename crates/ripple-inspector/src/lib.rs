#![deny(missing_docs)]

//! Observability sink for the ripple propagation engine.
//!
//! The engine reports its activity to a
//! [`PropagationObserver`](ripple::PropagationObserver); this crate
//! provides a typed event model for those reports and a collecting
//! observer that accumulates them for inspection. It is the primary tool
//! for asserting what a turn actually did: which nodes evaluated, what
//! pulsed, and which dynamic edges moved.
//!
//! # Example
//!
//! ```ignore
//! use ripple::SubtreeEngine;
//! use ripple_inspector::EventCollector;
//!
//! let collector = EventCollector::new();
//! let engine = SubtreeEngine::builder().observer(collector.clone()).build();
//!
//! // ... build a graph and run turns ...
//!
//! let trace = collector.trace();
//! assert_eq!(trace.evaluate_count(node_id), 1);
//! ```

mod collector;
mod events;

pub use collector::*;
pub use events::*;
