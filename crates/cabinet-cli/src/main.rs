#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cabinet_devices::{Cabinet, CabinetConfig};
use cabinet_frame::{HexBytes, IoBuf};
use cabinet_iohook::{Handle, IoChain};
use cabinet_jvs::io3::{cmd, RESET_PARAM};
use cabinet_jvs::{encode_request, IdleBackend, BROADCAST};
use clap::Parser;

/// Largest response a single replayed request may produce.
const READ_LEN: usize = 4096;

#[derive(Debug, Parser)]
#[command(about = "Replays JVS request frames against emulated I/O boards and prints the responses")]
struct Args {
    /// Cabinet configuration (JSON). Defaults apply to anything omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Request frames, one hex string per line (`-` for stdin). Blank lines and lines starting
    /// with `#` are skipped.
    #[arg(long, default_value = "-")]
    input: String,

    /// Reset the bus and assign every node an address before replaying.
    #[arg(long)]
    assign: bool,
}

fn load_config(path: Option<&Path>) -> Result<CabinetConfig> {
    let Some(path) = path else {
        return Ok(CabinetConfig::default());
    };
    let file = File::open(path)
        .with_context(|| format!("failed to open config: {}", path.display()))?;
    let config: CabinetConfig = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid config: {}", path.display()))?;
    Ok(config)
}

fn parse_hex(line: &str) -> Result<Vec<u8>> {
    let digits: String = line.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if !digits.is_ascii() {
        bail!("non-hex characters in {line:?}");
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits in {line:?}");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}

/// An open JVS port on a cabinet's operation chain.
struct Session<'a> {
    chain: &'a IoChain,
    handle: Handle,
    overlapped: bool,
}

impl Session<'_> {
    fn exchange(&self, frame: &[u8]) -> Result<Vec<u8>> {
        self.chain
            .write(self.handle, frame)
            .context("write to JVS port failed")?;
        let resp = if self.overlapped {
            self.chain.read_overlapped(self.handle, READ_LEN)
        } else {
            self.chain.read(self.handle, READ_LEN)
        };
        resp.context("read from JVS port failed")
    }

    fn broadcast(&self, cmds: &[u8]) -> Result<Vec<u8>> {
        let mut frame = IoBuf::with_capacity(64);
        encode_request(BROADCAST, cmds, &mut frame)?;
        self.exchange(frame.filled())
    }

    fn assign(&self, nodes: u8, out: &mut impl Write) -> Result<()> {
        self.broadcast(&[cmd::RESET, RESET_PARAM])?;
        for addr in 1..=nodes {
            let resp = self.broadcast(&[cmd::ASSIGN_ADDR, addr])?;
            if resp.is_empty() {
                bail!("no node accepted address {addr}");
            }
            writeln!(out, "# assigned {addr:#04x}: {}", HexBytes(&resp))?;
        }
        Ok(())
    }

    fn replay(&self, input: impl BufRead, out: &mut impl Write) -> Result<usize> {
        let mut count = 0;
        for (lineno, line) in input.lines().enumerate() {
            let line = line.context("failed to read input")?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let frame = parse_hex(line).with_context(|| format!("line {}", lineno + 1))?;
            let resp = self.exchange(&frame)?;
            writeln!(out, "{}", HexBytes(&resp))?;
            count += 1;
        }
        Ok(count)
    }
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    if !config.jvs.enable {
        bail!("JVS emulation is disabled in the configuration");
    }

    let backends = vec![IdleBackend; usize::from(config.jvs.nodes)];
    let cabinet = Cabinet::new(&config, backends).context("failed to build cabinet")?;
    let port = config.jvs.port_name();
    let handle = cabinet
        .chain()
        .open(&port)
        .with_context(|| format!("failed to open {port}"))?;
    let session = Session {
        chain: cabinet.chain(),
        handle,
        overlapped: config.jvs.async_reads,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.assign {
        session.assign(config.jvs.nodes, &mut out)?;
    }

    let count = if args.input == "-" {
        session.replay(io::stdin().lock(), &mut out)?
    } else {
        let file = File::open(&args.input)
            .with_context(|| format!("failed to open input: {}", args.input))?;
        session.replay(BufReader::new(file), &mut out)?
    };
    out.flush()?;
    tracing::info!(frames = count, "replay finished");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    run(Args::parse())
}
