//! # Device descriptions
//!
//! A [`Device`] bundles everything needed to decode and encode one
//! model of OOK transmitter: a pulse-train state machine and a
//! bit-field formatter, both built from a declarative [`DeviceDesc`].
//! Callers obtain the description from whatever source they like; the
//! bundled CLI reads them from JSON files.
//!
//! Decoding consumes thresholded logic levels and yields the decoded
//! fields of any completed messages. Encoding runs the other way,
//! producing a baseband sample stream from field values.

use chrono::Local;
use num_complex::Complex;
use thiserror::Error;

use log::debug;

use crate::formatter::{Endianness, Format, Formatter, FormatterError, TimestampMode};
use crate::keyval::KeyValList;
use crate::statemachine::{
    GenerateError, ProcessOutcome, StateDesc, StateMachine, StateMachineError,
};

/// Transmit amplitude for the high logic level, leaving headroom
/// below full scale
const SOFT_GAIN: f32 = 0.95;

/// One enumeration entry of a field description
#[derive(Clone, Debug)]
pub struct EnumDesc {
    pub symbol: String,
    pub value: u64,
}

/// One message field, as read from a device description
#[derive(Clone, Debug)]
pub struct FieldDesc {
    pub name: String,
    pub start_bit: u32,
    pub end_bit: u32,
    pub format: Format,
    pub endianness: Endianness,

    /// Zero means "no scaling configured"
    pub scaling: f32,
    pub offset: f32,

    /// Textual default, parsed under the field's format
    pub default_value: String,

    /// Entries for `enum`-formatted fields; empty otherwise
    pub enum_values: Vec<EnumDesc>,
}

/// Complete description of one transmitter model
#[derive(Clone, Debug)]
pub struct DeviceDesc {
    pub name: String,
    pub description: String,

    /// Message length in bits
    pub num_bits: usize,

    pub timestamp: TimestampMode,
    pub states: Vec<StateDesc>,
    pub fields: Vec<FieldDesc>,
}

/// Errors raised while building a [`Device`] or generating samples
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("invalid state machine: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("invalid field table: {0}")]
    Formatter(#[from] FormatterError),

    #[error("cannot generate samples: {0}")]
    Generate(#[from] GenerateError),
}

/// Decoder and encoder for one transmitter model
///
/// Construction validates the whole description up front; once built,
/// [`process()`](Device::process) cannot fail and
/// [`generate()`](Device::generate) fails only on bad field values.
#[derive(Clone, Debug)]
pub struct Device {
    name: String,
    description: String,
    num_bits: usize,
    sm: StateMachine,
    fmt: Formatter,
}

impl Device {
    /// Build a device from its description, bound to a sample rate
    pub fn new(desc: &DeviceDesc, sample_rate: u32) -> Result<Self, DeviceError> {
        let sm = StateMachine::new(&desc.states, desc.num_bits, sample_rate)?;

        let mut fmt = Formatter::new(desc.fields.len(), desc.num_bits as u32, desc.timestamp)?;
        for field in &desc.fields {
            fmt.add_field(
                &field.name,
                field.start_bit,
                field.end_bit,
                field.format,
                field.enum_values.len(),
                field.endianness,
                field.scaling,
                field.offset,
            )?;

            for entry in &field.enum_values {
                fmt.add_field_enum(&field.name, &entry.symbol, entry.value as i64)?;
            }

            fmt.set_field_default(&field.name, &field.default_value)?;
        }

        debug!(
            "loaded device \"{}\": {} bits, {} states, {} fields",
            desc.name,
            desc.num_bits,
            desc.states.len(),
            desc.fields.len()
        );

        Ok(Self {
            name: desc.name.clone(),
            description: desc.description.clone(),
            num_bits: desc.num_bits,
            sm,
            fmt,
        })
    }

    /// Device model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description of the transmitter
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Message length in bits
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Decode thresholded logic levels
    ///
    /// Consumes all of `levels`, decoding as many complete messages as
    /// it contains. The returned list holds each message's fields in
    /// order; it is empty when no message completed. Framing errors
    /// reset the state machine and decoding continues with the
    /// remaining samples.
    pub fn process(&mut self, levels: &[bool]) -> KeyValList {
        let mut values = KeyValList::new();
        let mut consumed = 0;

        while consumed < levels.len() {
            let (n, outcome) = self.sm.process(&levels[consumed..]);

            if outcome == ProcessOutcome::OutputReady {
                self.fmt
                    .data_to_keyval(self.sm.message(), Local::now(), &mut values);
            }

            consumed += n;
        }

        values
    }

    /// Synthesize the baseband sample stream for one message
    ///
    /// Message fields start from their defaults; `params` overlays
    /// caller-supplied values by field name. The high logic level is
    /// emitted at amplitude 0.95.
    pub fn generate(&mut self, params: &KeyValList) -> Result<Vec<Complex<f32>>, DeviceError> {
        let mut data = vec![0u8; self.fmt.num_bytes()];
        self.fmt.default_data(&mut data);
        self.fmt.keyval_to_data(params, &mut data)?;

        Ok(self.sm.generate(&data, self.num_bits, SOFT_GAIN)?)
    }
}
