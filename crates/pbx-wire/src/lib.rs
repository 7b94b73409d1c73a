#![deny(missing_docs)]

//! Wire layer of the pbx ensemble: the flat parameter codec, the control
//! signals with their payload schemas, and the rendezvous channels that carry
//! them between the coordinator and its workers.

/// Parameter vector encoding and size checks.
pub mod codec;
/// Control signals and payload schemas.
pub mod signal;
/// Zero-capacity channel transport.
pub mod transport;

pub use codec::{decode, encode, expect_len, ParameterVector};
pub use signal::{Buffer, Extent, ExtentContext, Schema, Signal};
pub use transport::{rendezvous, CoordinatorLink, Packet, WorkerLink};
