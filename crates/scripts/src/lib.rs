//! # Restbench Scripts
//!
//! Pre-request dependency chains and post-response extract-and-set
//! actions around the injected request sender.
//!
//! A request may declare one pre-request dependency (send request R′
//! first) and any number of post-response actions (extract a value from
//! the response, assign it to a variable). Chains are bounded at depth 3
//! and cycle-checked per top-level send; two concurrent sends never share
//! a visited set.

pub mod error;
pub mod executor;
pub mod extract;

pub use error::{Result, ScriptError};
pub use executor::ScriptExecutor;
pub use extract::extract_value;
