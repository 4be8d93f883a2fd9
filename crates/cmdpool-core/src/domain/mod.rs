//! Domain model (IDs, envelopes, results, errors).

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod result;

pub use self::envelope::TaskEnvelope;
pub use self::errors::{ExecError, PoolError};
pub use self::ids::TaskId;
pub use self::result::{CommandResult, into_result};
