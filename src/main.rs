//! src/main.rs
//!
//! sound-mouse: turns mouth/breath sounds from the microphone into discrete
//! UI actions, with an offline calibrator that tunes each detector from
//! recorded examples.

use anyhow::Result;
use std::{ env, path::Path, sync::Arc };

mod audio;
mod channel;
mod config;
mod detect;
mod logger;
mod optimize;
mod pipeline;
mod sounds;
mod spectral;

mod mods;

use logger::{ LogLevel, Logger };

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Live,
    Calibrate,
    Replay,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,

    // paths
    pub log_path: String,
    pub config_path: String,
    pub plan_cache_path: String,
    pub examples_dir: String,
    pub input_path: String,

    pub seed: u64,
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        let cwd = env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        let in_cwd = |name: &str| cwd.join(name).to_string_lossy().into_owned();

        Self {
            mode: Mode::Live,
            log_path: in_cwd("sound-mouse.log"),
            config_path: in_cwd("sound-mouse.cfg"),
            plan_cache_path: in_cwd("plan-cache.txt"),
            examples_dir: in_cwd("recordings"),
            input_path: String::new(),
            seed: 1234,
            log_level: LogLevel::Info,
        }
    }
}

fn print_usage(cfg: &Config) {
    println!("Usage: sound-mouse [OPTIONS]\n");
    println!("Modes:");
    println!("  --mode live           (default) Detect sounds from the microphone");
    println!("  --mode calibrate      Tune detector thresholds from recorded examples");
    println!("  --mode replay         Run a recording through the detectors offline\n");
    println!("General paths:");
    println!("  --log-path <PATH>         Log file (default: {})", cfg.log_path);
    println!("  --config-path <PATH>      Detector config file (default: {})", cfg.config_path);
    println!(
        "  --plan-cache <PATH>       Transform plan cache (default: {})",
        cfg.plan_cache_path
    );
    println!(
        "  --log-level <LEVEL>       debug, info, warning, error (default: info)\n"
    );
    println!("Calibrate options:");
    println!(
        "  --examples-dir <DIR>      Recordings named <kind>-<count>.wav (default: {})",
        cfg.examples_dir
    );
    println!("  --seed <N>                Search RNG seed (default: {})\n", cfg.seed);
    println!("Replay options:");
    println!("  --input <PATH>            Recording to replay (.wav/.mp3/.flac)\n");
    println!("Examples:");
    println!("  sound-mouse --mode calibrate --examples-dir ./recordings");
    println!("  sound-mouse --mode replay --input ./recordings/blow-3.wav");
    println!("  sound-mouse --mode live --log-level debug");
}

fn parse_args(args: &[String]) -> std::result::Result<Config, String> {
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--mode" => {
                if i + 1 >= args.len() {
                    return Err("Missing value for --mode".to_string());
                }
                match args[i + 1].to_lowercase().as_str() {
                    "live" => {
                        config.mode = Mode::Live;
                    }
                    "calibrate" | "train" => {
                        config.mode = Mode::Calibrate;
                    }
                    "replay" => {
                        config.mode = Mode::Replay;
                    }
                    other => {
                        return Err(format!("Unknown mode: {}", other));
                    }
                }
                i += 2;
            }
            "--log-path" => {
                if i + 1 >= args.len() {
                    return Err("Missing value for --log-path".to_string());
                }
                config.log_path = args[i + 1].to_string();
                i += 2;
            }
            "--log-level" => {
                if i + 1 >= args.len() {
                    return Err("Missing value for --log-level".to_string());
                }
                match args[i + 1].to_lowercase().as_str() {
                    "debug" => {
                        config.log_level = LogLevel::Debug;
                    }
                    "info" => {
                        config.log_level = LogLevel::Info;
                    }
                    "warning" | "warn" => {
                        config.log_level = LogLevel::Warning;
                    }
                    "error" => {
                        config.log_level = LogLevel::Error;
                    }
                    other => {
                        return Err(
                            format!("Invalid log level: {}. Valid options: debug, info, warning, error", other)
                        );
                    }
                }
                i += 2;
            }
            "--config-path" => {
                if i + 1 >= args.len() {
                    return Err("Missing value for --config-path".to_string());
                }
                config.config_path = args[i + 1].to_string();
                i += 2;
            }
            "--plan-cache" => {
                if i + 1 >= args.len() {
                    return Err("Missing value for --plan-cache".to_string());
                }
                config.plan_cache_path = args[i + 1].to_string();
                i += 2;
            }
            "--examples-dir" => {
                if i + 1 >= args.len() {
                    return Err("Missing value for --examples-dir".to_string());
                }
                config.examples_dir = args[i + 1].to_string();
                i += 2;
            }
            "--input" => {
                if i + 1 >= args.len() {
                    return Err("Missing value for --input".to_string());
                }
                config.input_path = args[i + 1].to_string();
                i += 2;
            }
            "--seed" => {
                if i + 1 >= args.len() {
                    return Err("Missing value for --seed".to_string());
                }
                config.seed = args[i + 1].parse().map_err(|_| "Invalid seed value".to_string())?;
                i += 2;
            }
            "-h" | "--help" => {
                print_usage(&Config::default());
                std::process::exit(0);
            }
            _ => {
                return Err(format!("Unknown option: {}", args[i]));
            }
        }
    }

    Ok(config)
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let cli = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}\n", e);
            print_usage(&Config::default());
            std::process::exit(1);
        }
    };

    if let Some(dir) = Path::new(&cli.log_path).parent() {
        if !dir.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(dir);
        }
    }
    let logger = Arc::new(Logger::new(&cli.log_path, cli.log_level)?);

    match cli.mode {
        Mode::Live => mods::live::run_live(&cli, logger),
        Mode::Calibrate => mods::calibrate::run_calibrate(&cli, logger),
        Mode::Replay => mods::replay::run_replay(&cli, logger),
    }
}
