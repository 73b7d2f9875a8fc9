use std::fmt::Display;

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};

/// Standard input/output filename
pub const STDIO_FILE: &str = "-";

const USAGE_SHORT: &str = r#"
This program decodes and encodes On-Off-Keying (OOK) messages for devices described by JSON device files. Baseband samples are raw interleaved little-endian f32 I/Q pairs at the given sampling --rate.

See --help for more details.
"#;

const USAGE_LONG: &str = r#"
This program decodes and encodes On-Off-Keying (OOK) messages for devices described by JSON device files. Baseband samples are raw interleaved little-endian f32 I/Q pairs at the given sampling --rate.

To decode a capture, pipe or point it at the rx subcommand:

    ookdec -r 3000000 -d devices/keyfob.json \
        --filter filters/lpf.json rx --file capture.iq

Decoded messages are printed as "key: value" lines, one message per block. Pass --dig-out to also record the thresholded logic levels, one digit per line, which is useful when writing a new device description.

The tx subcommand runs the same device description in reverse and writes a baseband waveform:

    ookdec -r 3000000 -d devices/keyfob.json \
        tx --file out.iq --repeat 3 Serial=0x2a Button=open

Fields not given on the command line take the default values from the device description.
"#;

/// Top-level program arguments
#[derive(Parser, Clone, Debug)]
#[command(version)]
#[command(about, long_about = None)]
#[command(after_help = USAGE_SHORT, after_long_help = USAGE_LONG)]
#[command(max_term_width = 100)]
pub struct Args {
    /// Verbosity level (-vvv for more)
    #[arg(short, long, global = true, default_value_t = 0, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print nothing but decoded fields
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Sampling rate (Hz)
    ///
    /// The rate of the sample stream being read or written. Device
    /// descriptions are rate-independent; durations are converted to
    /// sample counts using this value.
    #[arg(short, long, global = true, default_value_t = 1_000_000)]
    pub rate: u32,

    /// Device description file (JSON)
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Filter description file (JSON). Optional.
    ///
    /// A cascade of decimating FIR stages applied to the sample stream
    /// before thresholding. Only used when receiving.
    #[arg(long, global = true)]
    pub filter: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Decode messages from a baseband sample stream
    Rx(RxArgs),

    /// Synthesize a baseband sample stream for one message
    Tx(TxArgs),
}

#[derive(clap::Args, Clone, Debug)]
pub struct RxArgs {
    /// Input file (or "-" for stdin)
    #[arg(long, default_value_t = STDIO_FILE.to_string())]
    pub file: String,

    /// Amplitude above which a sample counts as logic high
    #[arg(short, long, default_value_t = 0.1)]
    pub threshold: f32,

    /// Record thresholded logic levels to this file, one digit per line
    #[arg(long)]
    pub dig_out: Option<String>,
}

#[derive(clap::Args, Clone, Debug)]
pub struct TxArgs {
    /// Output file (or "-" for stdout)
    #[arg(long, default_value_t = STDIO_FILE.to_string())]
    pub file: String,

    /// Number of times to transmit the message
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// Silence before each repetition (microseconds)
    #[arg(long, default_value_t = 0)]
    pub delay_us: u64,

    /// Zero samples appended after the last repetition
    #[arg(long, default_value_t = 0)]
    pub pad: usize,

    /// Message field values
    #[arg(value_name = "FIELD=VALUE")]
    pub params: Vec<String>,
}

/// A program-level error with exit code
#[derive(Debug)]
pub struct CliError {
    error: anyhow::Error,
    exit_code: i32,
}

impl CliError {
    pub fn new(error: anyhow::Error, code: i32) -> CliError {
        CliError {
            error,
            exit_code: code,
        }
    }

    /// Print this error to the terminal
    ///
    /// clap errors print themselves; anything else goes through clap's
    /// formatter so the output looks consistent.
    pub fn print(&self) -> std::io::Result<()> {
        if let Some(e) = self.error.downcast_ref::<clap::Error>() {
            e.print()
        } else {
            Args::command()
                .error(ErrorKind::Format, self.to_string())
                .print()
        }
    }

    /// Print this error to the terminal and exit
    pub fn exit(&self) -> ! {
        drop(self.print());
        std::process::exit(self.exit_code);
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.error)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> CliError {
        CliError::new(err, 1)
    }
}

impl From<clap::Error> for CliError {
    fn from(err: clap::Error) -> CliError {
        let code = if err.use_stderr() { 1 } else { 0 };
        CliError::new(err.into(), code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clap() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_rx() {
        let args = Args::try_parse_from([
            "ookdec", "-r", "3000000", "-d", "dev.json", "rx", "--threshold", "0.2",
        ])
        .unwrap();

        assert_eq!(3_000_000, args.rate);
        assert_eq!(Some("dev.json"), args.device.as_deref());
        match args.command {
            Command::Rx(rx) => {
                assert_eq!(STDIO_FILE, rx.file);
                assert_eq!(0.2, rx.threshold);
            }
            _ => panic!("expected rx"),
        }
    }

    #[test]
    fn test_parse_tx_params() {
        let args = Args::try_parse_from([
            "ookdec", "-d", "dev.json", "tx", "--repeat", "3", "Serial=0x2a", "Button=open",
        ])
        .unwrap();

        match args.command {
            Command::Tx(tx) => {
                assert_eq!(3, tx.repeat);
                assert_eq!(vec!["Serial=0x2a", "Button=open"], tx.params);
            }
            _ => panic!("expected tx"),
        }
    }
}
