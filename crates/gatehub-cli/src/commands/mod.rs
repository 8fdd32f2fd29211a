//! Command implementations.

pub mod config;
pub mod dispatch;
pub mod report;
pub mod verify;

/// Exit codes shared by every command, so automation can distinguish "the
/// code is bad" from "the pipeline is broken".
pub mod exit_codes {
    /// Hub-level pass.
    pub const SUCCESS: u8 = 0;
    /// Usage or configuration error.
    pub const CONFIG_ERROR: u8 = 1;
    /// One or more gates failed.
    pub const GATE_FAILURE: u8 = 2;
    /// Infrastructure failure: timeout, rejection, missing evidence.
    pub const INFRA_FAILURE: u8 = 3;
}
