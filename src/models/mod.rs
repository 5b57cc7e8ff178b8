mod channel;
mod discrepancy;
mod dispute;
mod evidence;
mod fraud;
mod idempotency;
mod order;
mod transaction;

pub use channel::*;
pub use discrepancy::*;
pub use dispute::*;
pub use evidence::*;
pub use fraud::*;
pub use idempotency::*;
pub use order::*;
pub use transaction::*;
