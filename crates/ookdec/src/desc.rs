//! JSON description files
//!
//! Device and filter descriptions live in JSON files. This module
//! deserializes them with serde and converts them into the plain
//! description types the `ookay` library consumes, resolving the
//! string spellings of formats, endianness, conditions, and actions
//! along the way.

use std::fs;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde::Deserialize;

use ookay::{
    DeviceDesc, Endianness, EnumDesc, FieldDesc, FirStageDesc, Format, StateDesc, TimestampMode,
    TriggerAction, TriggerCondition, TriggerDesc,
};

#[derive(Deserialize, Debug)]
struct DeviceFile {
    device: DeviceJson,
}

#[derive(Deserialize, Debug)]
struct DeviceJson {
    name: String,
    description: String,
    num_bits: usize,
    #[serde(default)]
    timestamp: Option<String>,
    states: Vec<StateJson>,
    fields: Vec<FieldJson>,
}

#[derive(Deserialize, Debug)]
struct StateJson {
    name: String,
    #[serde(default)]
    duration_us: u64,
    #[serde(default)]
    timeout_us: u64,
    triggers: Vec<TriggerJson>,
}

#[derive(Deserialize, Debug)]
struct TriggerJson {
    condition: String,
    #[serde(default)]
    duration_us: u64,

    /// Next state name
    state: String,

    #[serde(default)]
    action: Option<String>,
}

#[derive(Deserialize, Debug)]
struct FieldJson {
    name: String,
    default: String,
    start_bit: u32,
    end_bit: u32,
    endianness: String,
    format: String,
    #[serde(default)]
    enum_values: Vec<EnumJson>,
    #[serde(default)]
    scaling: f32,
    #[serde(default)]
    offset: f32,
}

#[derive(Deserialize, Debug)]
struct EnumJson {
    string: String,

    /// Numeric, but spelled as a string so hex is allowed
    value: String,
}

#[derive(Deserialize, Debug)]
struct FilterFile {
    filter: FilterJson,
}

#[derive(Deserialize, Debug)]
struct FilterJson {
    stages: Vec<StageJson>,
}

#[derive(Deserialize, Debug)]
struct StageJson {
    decimation: u32,
    taps: Vec<f32>,
}

/// Load a device description from a JSON file
pub fn load_device(path: &str) -> Result<DeviceDesc, anyhow::Error> {
    let text =
        fs::read_to_string(path).with_context(|| format!("unable to read \"{}\"", path))?;
    device_from_str(&text).with_context(|| format!("in device file \"{}\"", path))
}

/// Load a filter description from a JSON file
pub fn load_filter(path: &str) -> Result<Vec<FirStageDesc>, anyhow::Error> {
    let text =
        fs::read_to_string(path).with_context(|| format!("unable to read \"{}\"", path))?;
    filter_from_str(&text).with_context(|| format!("in filter file \"{}\"", path))
}

pub fn device_from_str(text: &str) -> Result<DeviceDesc, anyhow::Error> {
    let file: DeviceFile = serde_json::from_str(text)?;
    let dev = file.device;

    let timestamp = match &dev.timestamp {
        None => TimestampMode::None,
        Some(s) => TimestampMode::from_str(s)
            .map_err(|_| anyhow!("unknown timestamp mode \"{}\"", s))?,
    };

    let mut states = Vec::with_capacity(dev.states.len());
    for state in &dev.states {
        let mut triggers = Vec::with_capacity(state.triggers.len());
        for trig in &state.triggers {
            triggers.push(TriggerDesc {
                condition: TriggerCondition::from_str(&trig.condition).map_err(|_| {
                    anyhow!(
                        "unknown trigger condition \"{}\" in state \"{}\"",
                        trig.condition,
                        state.name
                    )
                })?,
                duration_us: trig.duration_us,
                next_state: trig.state.clone(),
                action: match &trig.action {
                    None => TriggerAction::None,
                    Some(s) => TriggerAction::from_str(s).map_err(|_| {
                        anyhow!("unknown trigger action \"{}\" in state \"{}\"", s, state.name)
                    })?,
                },
            });
        }

        states.push(StateDesc {
            name: state.name.clone(),
            duration_us: state.duration_us,
            timeout_us: state.timeout_us,
            triggers,
        });
    }

    let mut fields = Vec::with_capacity(dev.fields.len());
    for field in &dev.fields {
        let mut enum_values = Vec::with_capacity(field.enum_values.len());
        for entry in &field.enum_values {
            enum_values.push(EnumDesc {
                symbol: entry.string.clone(),
                value: parse_u64(&entry.value).ok_or_else(|| {
                    anyhow!(
                        "invalid enumeration value \"{}\" in field \"{}\"",
                        entry.value,
                        field.name
                    )
                })?,
            });
        }

        fields.push(FieldDesc {
            name: field.name.clone(),
            start_bit: field.start_bit,
            end_bit: field.end_bit,
            format: Format::from_str(&field.format)
                .map_err(|_| anyhow!("unknown format \"{}\" in field \"{}\"", field.format, field.name))?,
            endianness: Endianness::from_str(&field.endianness).map_err(|_| {
                anyhow!(
                    "unknown endianness \"{}\" in field \"{}\"",
                    field.endianness,
                    field.name
                )
            })?,
            scaling: field.scaling,
            offset: field.offset,
            default_value: field.default.clone(),
            enum_values,
        });
    }

    Ok(DeviceDesc {
        name: dev.name,
        description: dev.description,
        num_bits: dev.num_bits,
        timestamp,
        states,
        fields,
    })
}

pub fn filter_from_str(text: &str) -> Result<Vec<FirStageDesc>, anyhow::Error> {
    let file: FilterFile = serde_json::from_str(text)?;

    Ok(file
        .filter
        .stages
        .into_iter()
        .map(|stage| FirStageDesc {
            decimation: stage.decimation,
            taps: stage.taps,
        })
        .collect())
}

/// Unsigned integer with optional 0x/0o/0b prefix
fn parse_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = text.strip_prefix("0o") {
        u64::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = text.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).ok()
    } else {
        text.parse().ok()
    }
}
