// firv-harden: the FIRV (fault-injection resilience verification) hardening
// pass. Functions carrying the opt-in attribute are rewritten to run their
// body twice and trap when the two runs disagree on the return value.

pub mod error;
pub mod pass;
pub mod passes;

pub use pass::{FunctionPass, PassContext, PassId, PreservedAnalyses, TargetConfig};
pub use passes::firv_harden::{create_firv_harden_pass, FirvHarden, FIRV_HARDEN_PASS_ID};
