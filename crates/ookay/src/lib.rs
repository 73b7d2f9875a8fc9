//! # ookay: a data-driven OOK decoder and encoder
//!
//! This crate decodes and encodes the On-Off-Keying (OOK) messages
//! used by simple ISM-band transmitters: keyfobs, doorbells, weather
//! sensors, and the like. Device behavior is entirely data-driven; a
//! [`DeviceDesc`] declares the message framing as a state machine over
//! pulse durations and the message contents as a table of named
//! bit-fields, and one description serves both directions.
//!
//! The receive pipeline looks like this:
//!
//! 1. Obtain complex baseband samples from your radio. If the hardware
//!    speaks SC16Q11, convert with [`sc16q11::to_complexf()`].
//! 2. Low-pass filter and decimate with a [`FirFilter`].
//! 3. Threshold sample power into logic levels.
//! 4. Feed the levels to [`Device::process()`], which returns the
//!    decoded fields of any completed messages as a [`KeyValList`].
//!
//! Transmission is the mirror image: [`Device::generate()`] turns
//! field values back into a baseband sample stream.
//!
//! ```
//! use ookay::{Device, DeviceDesc, KeyVal, KeyValList};
//!
//! # fn demo(desc: &DeviceDesc, levels: &[bool]) -> Result<(), ookay::DeviceError> {
//! let mut device = Device::new(desc, 1_000_000)?;
//!
//! // decode
//! for kv in &device.process(levels) {
//!     println!("{}: {}", kv.key, kv.value);
//! }
//!
//! // encode
//! let params: KeyValList = [KeyVal::new("Button", "open")].into_iter().collect();
//! let samples = device.generate(&params)?;
//! # let _ = samples;
//! # Ok(())
//! # }
//! ```
//!
//! Decoding tolerates noise: pulse durations are matched with a ±15%
//! tolerance, and framing violations quietly restart message assembly
//! rather than erroring out. Malformed device descriptions, on the
//! other hand, are rejected up front when the [`Device`] is built.

mod device;
mod filter;
mod formatter;
mod keyval;
pub mod sc16q11;
mod statemachine;

pub use device::{Device, DeviceDesc, DeviceError, EnumDesc, FieldDesc};
pub use filter::{FilterError, FirFilter, FirStageDesc};
pub use formatter::{Endianness, Format, Formatter, FormatterError, TimestampMode};
pub use keyval::{KeyVal, KeyValList};
pub use statemachine::{
    GenerateError, ProcessOutcome, StateDesc, StateMachine, StateMachineError, TriggerAction,
    TriggerCondition, TriggerDesc, DURATION_TOLERANCE,
};
