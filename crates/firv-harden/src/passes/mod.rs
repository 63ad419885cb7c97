pub mod firv_harden;

pub use firv_harden::*;
