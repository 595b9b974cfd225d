#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod engine;
mod error;
mod flags;
mod flatten;
mod node;
mod observe;
mod op;
mod signal;
mod stream;
mod topo_queue;
mod turn;

pub use engine::*;
pub use error::*;
pub use flags::*;
pub use flatten::*;
pub use node::*;
pub use observe::*;
pub use op::*;
pub use signal::*;
pub use stream::*;
pub use topo_queue::*;
pub use turn::*;
