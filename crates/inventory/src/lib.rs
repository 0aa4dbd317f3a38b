//! Instrument catalog (reference data).
//!
//! Describes what kinds of instruments exist and what they cost. The rental
//! ledger only ever reads it.

pub mod instrument;

pub use instrument::{Instrument, NewInstrument};
