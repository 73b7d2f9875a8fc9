//! # Pulse-train state machine
//!
//! A [`StateMachine`] turns a stream of thresholded logic levels into
//! message bits, and runs in reverse to synthesize a sample stream
//! from message bits. The machine is entirely data-driven: a device
//! description supplies named states and, per state, an ordered list
//! of triggers.
//!
//! Each trigger pairs a condition (a pulse edge, a timeout, message
//! completion, or "always") with an action (append a 0 or 1 bit,
//! mark the message ready, or nothing) and a successor state.
//! Durations are expressed in microseconds and matched with a
//! proportional tolerance, so one description serves any sample rate.
//!
//! The first state is always the reset state. On decode, a duration
//! mismatch quietly returns the machine to reset; the surrounding
//! sample stream is noise more often than not, and recovery matters
//! more than diagnosis. Encoding is the opposite: it runs from a
//! trusted description, so inconsistencies there are hard errors.

use num_complex::Complex;
use thiserror::Error;

use log::{debug, trace};

/// Index of the mandatory reset state
const STATE_RESET: usize = 0;

/// Proportional slack applied when matching durations
///
/// A nominal duration of `d` microseconds matches elapsed times in
/// `[d - TOLERANCE*d, d + TOLERANCE*d]`.
pub const DURATION_TOLERANCE: f64 = 0.15;

/// Condition under which a trigger fires
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TriggerCondition {
    /// Fires unconditionally
    #[strum(serialize = "always")]
    Always,

    /// Logic level rose since the previous sample
    #[strum(serialize = "pulse_start")]
    PulseStart,

    /// Logic level fell since the previous sample
    #[strum(serialize = "pulse_end")]
    PulseEnd,

    /// The state's timeout elapsed with no other trigger firing
    #[strum(serialize = "timeout")]
    Timeout,

    /// All of the message's bits have been accumulated
    #[strum(serialize = "msg_complete")]
    MsgComplete,
}

/// Action taken when a trigger fires
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TriggerAction {
    /// State transition only
    #[strum(serialize = "none")]
    None,

    /// Append a 0 bit to the message
    #[strum(serialize = "append_0")]
    Append0,

    /// Append a 1 bit to the message
    #[strum(serialize = "append_1")]
    Append1,

    /// Declare the accumulated message ready for output
    #[strum(serialize = "output_data")]
    OutputData,
}

/// One trigger of a state, as read from a device description
#[derive(Clone, Debug)]
pub struct TriggerDesc {
    pub condition: TriggerCondition,

    /// Elapsed time the machine must have spent in the state for this
    /// trigger to be considered; zero means any
    pub duration_us: u64,

    /// Name of the state entered when this trigger fires
    pub next_state: String,

    pub action: TriggerAction,
}

/// One state, as read from a device description
#[derive(Clone, Debug)]
pub struct StateDesc {
    pub name: String,

    /// Nominal time spent in this state; zero means unconstrained.
    /// Checked against the actual elapsed time when a pulse-edge
    /// trigger fires, and emitted as the state's dwell time when
    /// generating samples.
    pub duration_us: u64,

    /// Elapsed time after which a `timeout` trigger fires
    pub timeout_us: u64,

    /// Triggers, evaluated in declaration order
    pub triggers: Vec<TriggerDesc>,
}

/// Errors raised while building a [`StateMachine`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    #[error("a state machine needs at least one state")]
    NoStates,

    #[error("the first state must be \"reset\", not \"{0}\"")]
    FirstStateNotReset(String),

    #[error("state \"{0}\" is defined more than once")]
    DuplicateState(String),

    #[error("trigger in state \"{state}\" names unknown state \"{next_state}\"")]
    UnknownNextState { state: String, next_state: String },

    #[error("message length cannot be zero bits")]
    NoBits,

    #[error("sample rate cannot be zero")]
    ZeroSampleRate,
}

/// Errors raised while synthesizing a sample stream
///
/// These always indicate an inconsistent device description or an
/// oversized message, never bad signal data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    /// A timeout trigger was reached while generating. Timeouts model
    /// the absence of signal and have no transmit-side meaning; this
    /// usually means a timeout is listed ahead of conditions that
    /// should take precedence.
    #[error("timeout trigger reached in state \"{0}\" while generating")]
    TimeoutDuringGenerate(String),

    /// No trigger in the current state can advance generation
    #[error("no usable trigger in state \"{0}\" while generating")]
    NoTrigger(String),

    /// A pulse_start trigger fired with the line already high
    #[error("pulse start in state \"{0}\" but the line is already high")]
    LineAlreadyHigh(String),

    /// A pulse_end trigger fired with the line already low
    #[error("pulse end in state \"{0}\" but the line is already low")]
    LineAlreadyLow(String),
}

/// Result of feeding logic levels through the machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// All supplied samples consumed without completing a message
    NoOutput,

    /// A complete message is available from
    /// [`message()`](StateMachine::message)
    OutputReady,

    /// A duration check failed and the machine returned to reset
    Reset,
}

/// Trigger with its successor resolved to a state index
#[derive(Clone, Copy, Debug)]
struct Trigger {
    condition: TriggerCondition,
    duration_us: u64,
    action: TriggerAction,
    next_state: usize,
}

#[derive(Clone, Debug)]
struct State {
    name: String,
    duration_us: u64,
    timeout_us: u64,
    triggers: Vec<Trigger>,
}

/// Sample generator scratch state for the transmit path
struct GenState {
    on_val: f32,
    line_high: bool,
    samples: Vec<Complex<f32>>,
}

/// Data-driven message framer for thresholded OOK pulse trains
///
/// Decoding accumulates bits into an internal message buffer; when a
/// trigger with the `output_data` action fires,
/// [`process()`](StateMachine::process) reports
/// [`ProcessOutcome::OutputReady`] and the bits can be read with
/// [`message()`](StateMachine::message). Encoding replays the same
/// state graph with [`generate()`](StateMachine::generate).
#[derive(Clone, Debug)]
pub struct StateMachine {
    states: Vec<State>,
    curr: usize,

    /// Message accumulator, `(max_bits + 7) / 8` bytes
    data: Vec<u8>,
    max_bits: usize,
    num_bits: usize,

    prev_level: bool,

    /// Microseconds since the last trigger fired
    elapsed_us: f64,

    /// Total samples seen, for trace output only
    count_monotonic: u64,

    sample_rate: u32,
}

impl StateMachine {
    /// Build a machine from state descriptions
    ///
    /// `states[0]` must be named `"reset"`, and every trigger's
    /// `next_state` must name one of the supplied states. `max_bits`
    /// is the message length in bits.
    pub fn new(
        states: &[StateDesc],
        max_bits: usize,
        sample_rate: u32,
    ) -> Result<Self, StateMachineError> {
        if states.is_empty() {
            return Err(StateMachineError::NoStates);
        }
        if !states[STATE_RESET].name.eq_ignore_ascii_case("reset") {
            return Err(StateMachineError::FirstStateNotReset(
                states[STATE_RESET].name.clone(),
            ));
        }
        if max_bits == 0 {
            return Err(StateMachineError::NoBits);
        }
        if sample_rate == 0 {
            return Err(StateMachineError::ZeroSampleRate);
        }

        for (i, state) in states.iter().enumerate() {
            if states[..i]
                .iter()
                .any(|s| s.name.eq_ignore_ascii_case(&state.name))
            {
                return Err(StateMachineError::DuplicateState(state.name.clone()));
            }
        }

        let find = |name: &str| {
            states
                .iter()
                .position(|s| s.name.eq_ignore_ascii_case(name))
        };

        let mut resolved = Vec::with_capacity(states.len());
        for state in states {
            let mut triggers = Vec::with_capacity(state.triggers.len());
            for trig in &state.triggers {
                let next_state =
                    find(&trig.next_state).ok_or_else(|| StateMachineError::UnknownNextState {
                        state: state.name.clone(),
                        next_state: trig.next_state.clone(),
                    })?;

                triggers.push(Trigger {
                    condition: trig.condition,
                    duration_us: trig.duration_us,
                    action: trig.action,
                    next_state,
                });
            }

            resolved.push(State {
                name: state.name.clone(),
                duration_us: state.duration_us,
                timeout_us: state.timeout_us,
                triggers,
            });
        }

        Ok(Self {
            states: resolved,
            curr: STATE_RESET,
            data: vec![0u8; (max_bits + 7) / 8],
            max_bits,
            num_bits: 0,
            prev_level: false,
            elapsed_us: 0.0,
            count_monotonic: 0,
            sample_rate,
        })
    }

    /// Message length in bits
    pub fn max_bits(&self) -> usize {
        self.max_bits
    }

    /// Bits accumulated toward the current message
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// The accumulated message, LSB-first within each byte
    ///
    /// Only meaningful after [`process()`](StateMachine::process)
    /// reports [`ProcessOutcome::OutputReady`].
    pub fn message(&self) -> &[u8] {
        &self.data
    }

    /// Feed thresholded logic levels through the machine
    ///
    /// Consumes samples until a message completes, a duration check
    /// fails, or `input` is exhausted, whichever comes first. Returns
    /// the number of samples consumed and the reason for stopping;
    /// callers resume with the unconsumed remainder.
    pub fn process(&mut self, input: &[bool]) -> (usize, ProcessOutcome) {
        let mut outcome = ProcessOutcome::NoOutput;
        let mut consumed = 0;

        for &level in input {
            outcome = self.step(level);
            self.prev_level = level;
            consumed += 1;

            if outcome != ProcessOutcome::NoOutput {
                break;
            }
        }

        (consumed, outcome)
    }

    fn step(&mut self, level: bool) -> ProcessOutcome {
        // the reset state is transitioned through: clear the message,
        // let a trigger fire, then evaluate the same sample again in
        // whatever state it selected
        if self.curr == STATE_RESET {
            self.num_bits = 0;
            self.data.fill(0);

            let outcome = self.handle_rx_triggers(level);
            if outcome != ProcessOutcome::NoOutput {
                return outcome;
            }
        }

        self.handle_rx_triggers(level)
    }

    /// Scan the current state's triggers against one sample
    fn handle_rx_triggers(&mut self, level: bool) -> ProcessOutcome {
        let state = &self.states[self.curr];

        let mut fired: Option<Trigger> = None;
        let mut check_duration = false;

        for trig in &state.triggers {
            if !self.duration_matches(trig.duration_us) {
                continue;
            }

            let hit = match trig.condition {
                TriggerCondition::Always => true,
                TriggerCondition::PulseStart => !self.prev_level && level,
                TriggerCondition::PulseEnd => self.prev_level && !level,
                TriggerCondition::Timeout => self.elapsed_us >= state.timeout_us as f64,
                TriggerCondition::MsgComplete => self.num_bits >= self.max_bits,
            };

            if hit {
                trace!(
                    "{{{}}} {} trigger @ sample {}",
                    state.name,
                    trig.condition,
                    self.count_monotonic
                );

                check_duration = matches!(
                    trig.condition,
                    TriggerCondition::PulseStart | TriggerCondition::PulseEnd
                );
                fired = Some(*trig);
                break;
            }
        }

        let mut result = ProcessOutcome::NoOutput;

        match fired {
            Some(trig) => {
                // pulse edges additionally validate how long the
                // machine dwelt in the state it is leaving
                if !check_duration || self.duration_matches(self.states[self.curr].duration_us) {
                    match trig.action {
                        TriggerAction::None => {}
                        TriggerAction::Append0 => self.append_bit(false),
                        TriggerAction::Append1 => self.append_bit(true),
                        TriggerAction::OutputData => result = ProcessOutcome::OutputReady,
                    }

                    if self.curr != trig.next_state {
                        trace!("next state: {}", self.states[trig.next_state].name);
                    }
                    self.curr = trig.next_state;
                } else {
                    debug!(
                        "{{{}}} dwelt {:.1} us, expected {} us; resetting",
                        self.states[self.curr].name,
                        self.elapsed_us,
                        self.states[self.curr].duration_us
                    );

                    result = ProcessOutcome::Reset;
                    self.curr = STATE_RESET;
                }

                self.elapsed_us = 0.0;
            }

            None => {
                self.elapsed_us += 1e6 / self.sample_rate as f64;
            }
        }

        self.count_monotonic += 1;
        result
    }

    /// Elapsed-time match with proportional tolerance; zero means any
    fn duration_matches(&self, duration_us: u64) -> bool {
        if duration_us == 0 {
            return true;
        }

        let nominal = duration_us as f64;
        let min = nominal - DURATION_TOLERANCE * nominal;
        let max = nominal + DURATION_TOLERANCE * nominal;
        self.elapsed_us >= min && self.elapsed_us <= max
    }

    fn append_bit(&mut self, one: bool) {
        if self.num_bits < self.max_bits {
            let byte = self.num_bits / 8;
            let bit = self.num_bits % 8;

            trace!("bit {}: {}", self.num_bits, one as u8);

            if one {
                self.data[byte] |= 1 << bit;
            } else {
                self.data[byte] &= !(1 << bit);
            }
        } else {
            debug!("dropped bit appended past a full message");
        }

        self.num_bits += 1;
    }

    /// Synthesize the sample stream for a message
    ///
    /// Replays the state graph from reset, emitting each state's dwell
    /// time at the current logic level. The first `num_bits` bits of
    /// `data` (LSB-first within each byte) drive trigger selection; a
    /// final data-independent pass lets the machine run out to message
    /// completion. Samples are `on_val + 0j` while the line is high
    /// and zero while it is low.
    pub fn generate(
        &mut self,
        data: &[u8],
        num_bits: usize,
        on_val: f32,
    ) -> Result<Vec<Complex<f32>>, GenerateError> {
        assert!(data.len() * 8 >= num_bits, "message buffer too short");

        self.curr = STATE_RESET;
        self.num_bits = 0;

        let mut gen = GenState {
            on_val,
            line_high: false,
            samples: Vec::with_capacity(16384),
        };

        for i in 0..num_bits {
            let bit = (data[i / 8] >> (i % 8)) & 1 != 0;
            trace!("generating samples for bit {}", i);
            self.generate_bit(bit, &mut gen)?;
        }

        // data-independent remainder of the signal
        self.generate_bit(false, &mut gen)?;

        Ok(gen.samples)
    }

    /// Advance the machine until `bit` has been consumed
    fn generate_bit(&mut self, bit: bool, gen: &mut GenState) -> Result<(), GenerateError> {
        loop {
            if self.handle_tx_triggers(bit, gen)? {
                return Ok(());
            }
        }
    }

    /// Take one transmit-side transition. Returns true once `bit` has
    /// been consumed (appended or the message completed).
    fn handle_tx_triggers(&mut self, bit: bool, gen: &mut GenState) -> Result<bool, GenerateError> {
        // prefer a trigger whose action matches the bit being sent;
        // fall back to the first trigger that can fire at all
        let trig = match self.find_tx_trigger(bit, true)? {
            Some(trig) => trig,
            None => self.find_tx_trigger(bit, false)?.ok_or_else(|| {
                GenerateError::NoTrigger(self.states[self.curr].name.clone())
            })?,
        };

        // a trigger duration on a state with no dwell time of its own
        // means "hold the line this long before the event"
        if self.states[self.curr].duration_us == 0 && trig.duration_us != 0 {
            self.append_samples(gen, trig.duration_us);
        }

        let mut done = false;

        match trig.condition {
            TriggerCondition::MsgComplete => {
                done = true;
            }

            TriggerCondition::PulseStart => {
                if gen.line_high {
                    return Err(GenerateError::LineAlreadyHigh(
                        self.states[self.curr].name.clone(),
                    ));
                }
                gen.line_high = true;
            }

            TriggerCondition::PulseEnd => {
                if !gen.line_high {
                    return Err(GenerateError::LineAlreadyLow(
                        self.states[self.curr].name.clone(),
                    ));
                }
                gen.line_high = false;
            }

            TriggerCondition::Always | TriggerCondition::Timeout => {}
        }

        if matches!(trig.action, TriggerAction::Append0 | TriggerAction::Append1)
            && self.num_bits < self.max_bits
        {
            self.num_bits += 1;
            done = true;
            trace!("bit count now {}/{}", self.num_bits, self.max_bits);
        }

        self.curr = trig.next_state;
        trace!("next state: {}", self.states[self.curr].name);

        let dwell = self.states[self.curr].duration_us;
        if dwell != 0 {
            self.append_samples(gen, dwell);
        }

        Ok(done)
    }

    /// Find the first transmit-usable trigger in the current state
    ///
    /// With `match_bit_action` set, only triggers whose action agrees
    /// with the bit being sent are considered. Message completion
    /// requires the full bit count; a timeout trigger is an error on
    /// the transmit side.
    fn find_tx_trigger(
        &self,
        bit: bool,
        match_bit_action: bool,
    ) -> Result<Option<Trigger>, GenerateError> {
        for trig in &self.states[self.curr].triggers {
            if match_bit_action {
                let agrees = match trig.action {
                    TriggerAction::Append0 => !bit,
                    TriggerAction::Append1 => bit,
                    TriggerAction::OutputData => true,
                    TriggerAction::None => false,
                };
                if !agrees {
                    continue;
                }
            }

            match trig.condition {
                TriggerCondition::MsgComplete => {
                    if self.num_bits == self.max_bits {
                        return Ok(Some(*trig));
                    }
                }

                TriggerCondition::Timeout => {
                    return Err(GenerateError::TimeoutDuringGenerate(
                        self.states[self.curr].name.clone(),
                    ));
                }

                TriggerCondition::Always
                | TriggerCondition::PulseStart
                | TriggerCondition::PulseEnd => {
                    return Ok(Some(*trig));
                }
            }
        }

        Ok(None)
    }

    fn append_samples(&self, gen: &mut GenState, duration_us: u64) {
        let count = self.sample_count(duration_us);
        let value = if gen.line_high { gen.on_val } else { 0.0 };

        trace!("appending {} samples of {}+0j", count, value);

        gen.samples
            .extend(std::iter::repeat(Complex::new(value, 0.0)).take(count));
    }

    /// Microseconds to samples, rounded to nearest
    fn sample_count(&self, duration_us: u64) -> usize {
        (duration_us as f64 * (self.sample_rate as f64 / 1e6) + 0.5) as usize
    }
}
