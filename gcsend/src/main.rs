mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use gcstream::{
    Config, Error, FlowController, InputSource, PollLink, Program, SerialDevice, DEFAULT_SPEED,
};
use log::{error, info, warn, LevelFilter};
use std::{
    env,
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

/// Send gcode to a serial-attached controller, one acknowledged line at a time
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial device the controller is attached to
    #[arg(required_unless_present_any = ["check", "dump"])]
    device: Option<PathBuf>,

    /// Gcode file to send, `-` for standard input
    #[arg(short, long, default_value = "-")]
    file: PathBuf,

    /// Serial line speed
    #[arg(short, long, default_value_t = DEFAULT_SPEED)]
    speed: u32,

    /// Lines that may be sent ahead of their acknowledgment
    #[arg(short = 'u', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    max_unconfirmed: u32,

    /// Milliseconds to wait for an acknowledgment before giving up
    #[arg(short, long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Strip whitespace and comments from lines before sending them
    #[arg(short = 'c', long)]
    strip: bool,

    /// Acknowledgment the controller sends per line; `\r` and `\n` escapes are understood
    #[arg(long, default_value = "ok\\r\\n", value_parser = parse_token)]
    ack: AckToken,

    /// Parse the file and report malformed lines, without a device
    #[arg(long)]
    check: bool,

    /// Print every parsed block as a line of JSON, without a device
    #[arg(long, conflicts_with = "check")]
    dump: bool,

    /// Only report warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Enable debug messages, twice to include device traffic
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write log to file instead of stderr
    #[arg(short, long)]
    logfile: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct AckToken(Vec<u8>);

fn parse_token(s: &str) -> Result<AckToken, String> {
    let mut token = Vec::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        let c = match c {
            '\\' => match chars.next() {
                Some('r') => '\r',
                Some('n') => '\n',
                Some('t') => '\t',
                Some('\\') => '\\',
                Some(other) => return Err(format!("unknown escape \\{other}")),
                None => return Err("trailing backslash".to_string()),
            },
            c => c,
        };
        let mut utf8 = [0u8; 4];
        token.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }
    if token.is_empty() {
        return Err("the acknowledgment token must not be empty".to_string());
    }
    Ok(AckToken(token))
}

fn init_logging(args: &Args) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if args.quiet {
        builder.filter(None, LevelFilter::Warn);
    } else {
        match args.verbose {
            0 if env::var_os("RUST_LOG").is_some() => {}
            0 => {
                builder.filter(None, LevelFilter::Info);
            }
            1 => {
                builder.filter(None, LevelFilter::Debug);
            }
            _ => {
                builder.filter(None, LevelFilter::Trace);
            }
        }
    }
    if let Some(ref logfile) = args.logfile {
        let target = File::create(logfile)
            .with_context(|| format!("can't create log file {}", logfile.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(target)));
    }
    builder.init();
    Ok(())
}

fn open_input(args: &Args) -> Result<InputSource> {
    InputSource::open(&args.file)
        .with_context(|| format!("can't open gcode file {}", args.file.display()))
}

fn send(args: &Args) -> Result<ExitCode> {
    let device_path = args.device.as_ref().context("no serial device given")?;
    signals::install().context("can't install signal handlers")?;

    info!("Serial device: {}", device_path.display());
    info!("Line speed: {}", args.speed);
    info!("Gcode file: {}", args.file.display());

    let input = open_input(args)?;
    if input.is_interactive() {
        info!("reading gcode from the terminal, end with ^D");
    }
    let device = SerialDevice::open(device_path, args.speed)?;

    let config = Config {
        max_unconfirmed: args.max_unconfirmed as usize,
        timeout: Duration::from_millis(args.timeout_ms),
        strip: args.strip,
        ack_token: args.ack.0.clone(),
    };
    let mut flow = FlowController::new(
        PollLink::new(device, input),
        config,
        signals::cancel_token(),
    );
    let summary = flow.run()?;

    info!(
        "{} line(s) sent, {} acknowledged",
        summary.lines_sent, summary.acknowledged
    );
    if summary.malformed > 0 {
        warn!("{} malformed line(s) were not sent", summary.malformed);
    }
    if summary.spurious_acks > 0 {
        warn!(
            "{} acknowledgment(s) arrived with nothing in flight",
            summary.spurious_acks
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn check(args: &Args) -> Result<ExitCode> {
    let program = Program::read_from(open_input(args)?)?;
    for bad in program.malformed() {
        println!(
            "{}:{}: {}: {}",
            args.file.display(),
            bad.source_line,
            bad.error,
            bad.text
        );
    }
    info!(
        "{} block(s), {} malformed line(s)",
        program.len(),
        program.malformed().len()
    );
    Ok(if program.malformed().is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn dump(args: &Args) -> Result<ExitCode> {
    let program = Program::read_from(open_input(args)?)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for block in program.blocks() {
        serde_json::to_writer(&mut out, block)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    let result = if args.check {
        check(&args)
    } else if args.dump {
        dump(&args)
    } else {
        send(&args)
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            if let Some(Error::Cancelled) = e.downcast_ref::<Error>() {
                // Everything is closed by now; die the way the signal intended
                signals::reraise();
            }
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
