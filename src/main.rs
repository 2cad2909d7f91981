//! src/main.rs

use anyhow::Result;
use std::{ env, sync::Arc };

mod capture;
mod decode;
mod logger;
mod mods;
mod pipeline;

use logger::{ LogLevel, Logger };
use pipeline::{ params, HistoryPolicy, Params };

// ───────────────────────────────────────────────────────────────────────────────
// CLI config + parsing
// ───────────────────────────────────────────────────────────────────────────────
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Live,
    Offline,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,

    // paths; empty means stderr / no CSV
    pub log_path: String,
    pub out_path: String,
    pub input_path: String,
    pub log_level: LogLevel,

    /// Requested pipeline rate. Live falls back to the device default when
    /// unsupported; offline treats 0 as the file's own rate.
    pub sample_rate: u32,
    pub tick_ms: u64,
    pub history_policy: HistoryPolicy,
    pub reopen_attempts: u32,
    /// Offline push size in frames.
    pub block_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Live,
            log_path: String::new(),
            out_path: String::new(),
            input_path: String::new(),
            log_level: LogLevel::Info,
            sample_rate: params::SAMPLE_RATE,
            tick_ms: 1000,
            history_policy: HistoryPolicy::Keep,
            reopen_attempts: 3,
            block_frames: 4096,
        }
    }
}

impl Config {
    /// Pipeline parameters at the rate actually in use.
    pub fn params(&self, sample_rate: u32) -> Params {
        Params {
            history_policy: self.history_policy,
            ..Params::default().with_sample_rate(sample_rate)
        }
    }
}

fn print_usage(cfg: &Config) {
    println!("Usage: ambient-fingerprint [OPTIONS]\n");
    println!("Modes:");
    println!("  --mode <live|offline>         live: default microphone (default)");
    println!("                                offline: fingerprint a file given by --input");
    println!();
    println!("Paths:");
    println!("  --log-path <PATH>             Log file (default: stderr)");
    println!("  --log-level <LEVEL>           debug, info, warning, error (default: info)");
    println!("  --out <PATH>                  Append fingerprints to this CSV (default: none)");
    println!("  --input <PATH>                Audio file for offline mode (wav/mp3/mp4/m4a/flac/ogg)");
    println!();
    println!("Pipeline:");
    println!(
        "  --sr, --sample-rate <HZ>      Pipeline sample rate (default: {}; offline 0 = file rate)",
        cfg.sample_rate
    );
    println!(
        "  --history-policy <keep|reset> History on device reconfiguration (default: keep)"
    );
    println!();
    println!("Run loop:");
    println!("  --tick-ms <MS>                Snapshot period (default: {})", cfg.tick_ms);
    println!(
        "  --reopen-attempts <N>         Live: reopen tries after a device failure (default: {})",
        cfg.reopen_attempts
    );
    println!(
        "  --block-frames <N>            Offline: frames per push (default: {})",
        cfg.block_frames
    );
    println!("  -h, --help                    Show this help");
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> std::result::Result<&'a str, String> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("Missing value for {}", flag))
}

/// Parses `args` (program name first). `Ok(None)` means help was requested.
fn parse_arguments(args: &[String]) -> std::result::Result<Option<Config>, String> {
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--mode" => {
                config.mode = match value(args, i, flag)?.to_lowercase().as_str() {
                    "live" => Mode::Live,
                    "offline" => Mode::Offline,
                    other => {
                        return Err(format!("Unknown mode: {}", other));
                    }
                };
                i += 2;
            }
            "--log-path" => {
                config.log_path = value(args, i, flag)?.to_string();
                i += 2;
            }
            "--log-level" => {
                config.log_level = value(args, i, flag)?.parse()?;
                i += 2;
            }
            "--out" => {
                config.out_path = value(args, i, flag)?.to_string();
                i += 2;
            }
            "--input" => {
                config.input_path = value(args, i, flag)?.to_string();
                i += 2;
            }
            "--sr" | "--sample-rate" => {
                config.sample_rate = value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid sample-rate value".to_string())?;
                i += 2;
            }
            "--tick-ms" => {
                let v: u64 = value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid tick-ms value".to_string())?;
                config.tick_ms = v.max(1);
                i += 2;
            }
            "--history-policy" => {
                config.history_policy = match value(args, i, flag)?.to_lowercase().as_str() {
                    "keep" => HistoryPolicy::Keep,
                    "reset" => HistoryPolicy::Reset,
                    other => {
                        return Err(format!("Unknown history policy: {} (keep|reset)", other));
                    }
                };
                i += 2;
            }
            "--reopen-attempts" => {
                config.reopen_attempts = value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid reopen-attempts value".to_string())?;
                i += 2;
            }
            "--block-frames" => {
                let v: usize = value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid block-frames value".to_string())?;
                config.block_frames = v.max(1);
                i += 2;
            }
            "-h" | "--help" => {
                return Ok(None);
            }
            _ => {
                return Err(format!("Unknown option: {}", args[i]));
            }
        }
    }

    if config.mode == Mode::Live && config.sample_rate == 0 {
        return Err("--sample-rate 0 is only meaningful in offline mode".to_string());
    }
    Ok(Some(config))
}

// ───────────────────────────────────────────────────────────────────────────────
// main
// ───────────────────────────────────────────────────────────────────────────────
fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let cli = match parse_arguments(&args) {
        Ok(Some(c)) => c,
        Ok(None) => {
            print_usage(&Config::default());
            return Ok(());
        }
        Err(e) => {
            eprintln!("error: {}\n", e);
            print_usage(&Config::default());
            std::process::exit(1);
        }
    };

    let logger = Arc::new(
        if cli.log_path.is_empty() {
            Logger::stderr(cli.log_level)
        } else {
            Logger::new(&cli.log_path, cli.log_level)?
        }
    );

    match cli.mode {
        Mode::Live => mods::live::run_live(&cli, logger),
        Mode::Offline => mods::offline::run_offline(&cli, logger),
    }
}
