//! Process-level helpers for the monitor binary.

mod sig_down;

pub use sig_down::SigDown;
