//! Receive and transmit processing loops
//!
//! Samples cross stdin/stdout or files as raw interleaved
//! little-endian `f32` I/Q pairs. The receive loop reads a chunk,
//! optionally filters it, thresholds sample power into logic levels,
//! and hands the levels to the device; decoded messages print as
//! `key: value` blocks. The transmit loop runs once per repetition
//! and writes the synthesized waveform back out.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};

use anyhow::{anyhow, Context};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use num_complex::Complex;

use ookay::{Device, FirFilter, KeyVal, KeyValList};

use crate::cli::{Args, RxArgs, TxArgs, STDIO_FILE};

/// Samples read from the source per processing pass
pub const CHUNK_SAMPLES: usize = 4096;

/// Run the receive pipeline until the input is exhausted
pub fn run_rx(
    rx: &RxArgs,
    device: &mut Device,
    mut filter: Option<&mut FirFilter>,
) -> Result<(), anyhow::Error> {
    let mut input = open_input(&rx.file)?;

    let mut dig_out = match &rx.dig_out {
        Some(path) => Some(BufWriter::new(File::create(path).with_context(|| {
            format!("unable to create --dig-out \"{}\"", path)
        })?)),
        None => None,
    };

    let threshold_sq = rx.threshold * rx.threshold;

    let mut samples = vec![Complex::new(0.0f32, 0.0); CHUNK_SAMPLES];
    let mut filtered = vec![Complex::new(0.0f32, 0.0); CHUNK_SAMPLES];
    let mut levels = vec![false; CHUNK_SAMPLES];

    loop {
        let count = read_samples(&mut input, &mut samples)?;
        if count == 0 {
            break;
        }

        let level_count = match filter.as_mut() {
            Some(fir) => {
                let n = fir.process(&samples[..count], &mut filtered)?;
                threshold(&filtered[..n], threshold_sq, &mut levels);
                n
            }
            None => {
                threshold(&samples[..count], threshold_sq, &mut levels);
                count
            }
        };

        if let Some(out) = dig_out.as_mut() {
            for &level in &levels[..level_count] {
                writeln!(out, "{}", level as u8)?;
            }
        }

        print_messages(&device.process(&levels[..level_count]));
    }

    if let Some(mut out) = dig_out {
        out.flush()?;
    }

    debug!("input exhausted");
    Ok(())
}

/// Generate a message waveform and write it out
pub fn run_tx(args: &Args, tx: &TxArgs, device: &mut Device) -> Result<(), anyhow::Error> {
    let params = parse_params(&tx.params)?;
    let samples = device.generate(&params)?;
    info!("generated {} samples per repetition", samples.len());

    let delay_samples = (args.rate as u64 * tx.delay_us / 1_000_000) as usize;

    let mut out = open_output(&tx.file)?;
    for _ in 0..tx.repeat {
        write_zeros(&mut out, delay_samples)?;
        write_samples(&mut out, &samples)?;
    }
    write_zeros(&mut out, tx.pad)?;
    out.flush()?;

    Ok(())
}

/// Squared-magnitude threshold into logic levels
fn threshold(samples: &[Complex<f32>], threshold_sq: f32, levels: &mut [bool]) {
    for (sample, level) in samples.iter().zip(levels.iter_mut()) {
        *level = sample.norm_sqr() >= threshold_sq;
    }
}

fn print_messages(values: &KeyValList) {
    if values.is_empty() {
        return;
    }

    for kv in values {
        println!("{:>20}: {}", kv.key, kv.value);
    }
    println!();
}

/// Parse `FIELD=VALUE` arguments into a key-value list
fn parse_params(params: &[String]) -> Result<KeyValList, anyhow::Error> {
    params
        .iter()
        .map(|param| {
            let (key, value) = param
                .split_once('=')
                .ok_or_else(|| anyhow!("expected FIELD=VALUE, got \"{}\"", param))?;
            Ok(KeyVal::new(key, value))
        })
        .collect()
}

/// Fill `buf` with I/Q pairs from `input`
///
/// Returns the number of samples read, which is less than `buf.len()`
/// only at end of input. A trailing unpaired value is dropped.
fn read_samples(
    input: &mut dyn io::Read,
    buf: &mut [Complex<f32>],
) -> Result<usize, anyhow::Error> {
    for (i, sample) in buf.iter_mut().enumerate() {
        let re = match input.read_f32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(i),
            Err(e) => return Err(e.into()),
        };
        let im = match input.read_f32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(i),
            Err(e) => return Err(e.into()),
        };

        *sample = Complex::new(re, im);
    }

    Ok(buf.len())
}

fn write_samples(out: &mut dyn Write, samples: &[Complex<f32>]) -> Result<(), anyhow::Error> {
    for sample in samples {
        out.write_f32::<LittleEndian>(sample.re)?;
        out.write_f32::<LittleEndian>(sample.im)?;
    }
    Ok(())
}

fn write_zeros(out: &mut dyn Write, count: usize) -> Result<(), anyhow::Error> {
    for _ in 0..count {
        out.write_f32::<LittleEndian>(0.0)?;
        out.write_f32::<LittleEndian>(0.0)?;
    }
    Ok(())
}

fn open_input(file: &str) -> Result<Box<dyn io::Read>, anyhow::Error> {
    if file == STDIO_FILE {
        info!("reading samples from standard input");
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        info!("reading samples from \"{}\"", file);
        Ok(Box::new(BufReader::new(
            File::open(file).with_context(|| format!("unable to open --file \"{}\"", file))?,
        )))
    }
}

fn open_output(file: &str) -> Result<Box<dyn Write>, anyhow::Error> {
    if file == STDIO_FILE {
        info!("writing samples to standard output");
        Ok(Box::new(BufWriter::new(io::stdout())))
    } else {
        info!("writing samples to \"{}\"", file);
        Ok(Box::new(BufWriter::new(File::create(file).with_context(
            || format!("unable to create --file \"{}\"", file),
        )?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ookay::{
        DeviceDesc, Endianness, FieldDesc, FirStageDesc, Format, StateDesc, TimestampMode,
        TriggerAction, TriggerCondition, TriggerDesc,
    };

    fn trig(
        condition: TriggerCondition,
        duration_us: u64,
        next_state: &str,
        action: TriggerAction,
    ) -> TriggerDesc {
        TriggerDesc {
            condition,
            duration_us,
            next_state: next_state.to_string(),
            action,
        }
    }

    /// 8-bit pulse-width device: 100 us pulse = 0, 200 us pulse = 1
    fn pwm_remote() -> DeviceDesc {
        DeviceDesc {
            name: "pwm-remote".to_string(),
            description: "Pulse-width keyfob".to_string(),
            num_bits: 8,
            timestamp: TimestampMode::None,
            states: vec![
                StateDesc {
                    name: "reset".to_string(),
                    duration_us: 0,
                    timeout_us: 0,
                    triggers: vec![trig(
                        TriggerCondition::PulseStart,
                        0,
                        "pulse",
                        TriggerAction::None,
                    )],
                },
                StateDesc {
                    name: "pulse".to_string(),
                    duration_us: 0,
                    timeout_us: 0,
                    triggers: vec![
                        trig(TriggerCondition::PulseEnd, 100, "gap", TriggerAction::Append0),
                        trig(TriggerCondition::PulseEnd, 200, "gap", TriggerAction::Append1),
                    ],
                },
                StateDesc {
                    name: "gap".to_string(),
                    duration_us: 100,
                    timeout_us: 0,
                    triggers: vec![
                        trig(
                            TriggerCondition::MsgComplete,
                            0,
                            "reset",
                            TriggerAction::OutputData,
                        ),
                        trig(TriggerCondition::PulseStart, 0, "pulse", TriggerAction::None),
                    ],
                },
            ],
            fields: vec![FieldDesc {
                name: "Serial".to_string(),
                start_bit: 0,
                end_bit: 7,
                format: Format::UnsignedDec,
                endianness: Endianness::Little,
                scaling: 0.0,
                offset: 0.0,
                default_value: "0".to_string(),
                enum_values: vec![],
            }],
        }
    }

    #[test]
    fn test_decimating_filter_lowers_decoder_rate() {
        const RATE: u32 = 1_000_000;

        let mut tx = Device::new(&pwm_remote(), RATE).unwrap();
        let params: KeyValList = [KeyVal::new("Serial", "170")].into_iter().collect();
        let samples = tx.generate(&params).unwrap();

        // decimate-by-4 boxcar, as a --filter description would configure
        let stages = [FirStageDesc {
            decimation: 4,
            taps: vec![0.25; 4],
        }];
        let mut fir = FirFilter::new(&stages, samples.len()).unwrap();
        let mut filtered = vec![Complex::new(0.0f32, 0.0); samples.len()];
        let count = fir.process(&samples, &mut filtered).unwrap();

        let mut levels = vec![false; count];
        threshold(&filtered[..count], 0.1 * 0.1, &mut levels);

        // the decoder runs at the post-decimation rate
        let mut rx = Device::new(&pwm_remote(), RATE / fir.total_decimation()).unwrap();
        let values = rx.process(&levels);
        assert_eq!(Some("170"), values.value_of("Serial"));

        // at the full input rate every pulse reads 4x too short and
        // nothing decodes
        let mut wrong_rate = Device::new(&pwm_remote(), RATE).unwrap();
        assert!(wrong_rate.process(&levels).is_empty());
    }

    #[test]
    fn test_parse_params() {
        let params = parse_params(&[
            "Serial=0x2a".to_string(),
            "Button=open=sesame".to_string(),
        ])
        .unwrap();

        assert_eq!(Some("0x2a"), params.value_of("Serial"));
        // only the first '=' splits
        assert_eq!(Some("open=sesame"), params.value_of("Button"));

        assert!(parse_params(&["Serial".to_string()]).is_err());
    }

    #[test]
    fn test_read_samples_round_trip() {
        let samples = [Complex::new(0.5f32, -0.25), Complex::new(1.0, 0.0)];

        let mut bytes = Vec::new();
        write_samples(&mut bytes, &samples).unwrap();
        assert_eq!(16, bytes.len());

        let mut buf = vec![Complex::new(0.0f32, 0.0); 8];
        let count = read_samples(&mut bytes.as_slice(), &mut buf).unwrap();
        assert_eq!(2, count);
        assert_eq!(samples[0], buf[0]);
        assert_eq!(samples[1], buf[1]);
    }

    #[test]
    fn test_read_samples_drops_unpaired_value() {
        // three f32 values: one complete sample plus a dangling I
        let mut bytes = Vec::new();
        for v in [1.0f32, 2.0, 3.0] {
            bytes.write_f32::<LittleEndian>(v).unwrap();
        }

        let mut buf = vec![Complex::new(0.0f32, 0.0); 4];
        let count = read_samples(&mut bytes.as_slice(), &mut buf).unwrap();
        assert_eq!(1, count);
        assert_eq!(Complex::new(1.0, 2.0), buf[0]);
    }

    #[test]
    fn test_threshold() {
        let samples = [
            Complex::new(0.05f32, 0.0),
            Complex::new(0.5, 0.0),
            Complex::new(0.0, 0.5),
            Complex::new(0.08, 0.08),
        ];

        let mut levels = [false; 4];
        threshold(&samples, 0.1 * 0.1, &mut levels);
        assert_eq!([false, true, true, true], levels);
    }
}
