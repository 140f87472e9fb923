mod cache;
mod config;
mod error;
mod memory;
mod place;
mod random;
mod stats;
mod trace;

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use env_logger::Env;
use log::{info, trace};

use config::Config;
use error::SimError;
use memory::{AbstractMemory, Memory};
use random::SeededRandom;
use stats::Statistics;
use trace::{Op, Trace, TraceStep};

#[derive(Debug)]
struct Args {
    config_path: PathBuf,
    print_config: bool,
    statistics: bool,
    disable_cache: bool,
    dump_memory: bool,
    json_path: Option<PathBuf>,
    trace_path: Option<PathBuf>,
}

impl Args {
    fn parse(mut args: pico_args::Arguments) -> Result<Args, SimError> {
        let print_config = args.contains("--print-config");
        let statistics = args.contains("--statistics");
        let disable_cache = args.contains("--disable-cache");
        let dump_memory = args.contains("--dump-memory");
        let json_path: Option<PathBuf> = args
            .opt_value_from_str("--json")
            .map_err(|_| SimError::Arguments)?;
        let trace_path: Option<PathBuf> = args
            .opt_value_from_str("-t")
            .map_err(|_| SimError::Arguments)?;

        let rest = args.finish();
        if rest.iter().any(|arg| arg.to_string_lossy().starts_with('-')) {
            return Err(SimError::Arguments);
        }
        let [config_path] = <[_; 1]>::try_from(rest).map_err(|_| SimError::Arguments)?;

        let others =
            statistics || disable_cache || dump_memory || json_path.is_some() || trace_path.is_some();
        if print_config && others {
            return Err(SimError::Arguments);
        }

        Ok(Args {
            config_path: config_path.into(),
            print_config,
            statistics,
            disable_cache,
            dump_memory,
            json_path,
            trace_path,
        })
    }
}

fn main() -> ExitCode {
    let env = Env::default()
        .filter_or("CACHESIM_LOG", "warn")
        .write_style_or("CACHESIM_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    match run(pico_args::Arguments::from_env()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: pico_args::Arguments) -> Result<(), SimError> {
    let args = Args::parse(args)?;
    let config = Config::read(&args.config_path)?;
    let mut out = io::stdout().lock();

    if args.print_config {
        config.print(&mut out)?;
        return Ok(());
    }

    let mut stats = Statistics::new();
    let mut mem = build_hierarchy(&config, &mut stats, args.disable_cache)?;
    let mut trace = Trace::open(args.trace_path.as_deref())?;

    while let Some(step) = trace.next_step()? {
        operate(&step, mem.as_mut(), &mut stats);
    }
    mem.flush(&mut stats);
    info!(
        "Ran {} reads and {} writes in {} cycles",
        stats.read_counter, stats.write_counter, stats.clock_counter
    );

    if args.dump_memory {
        mem.print_dump(&mut out)?;
    }
    let report = stats.make_report();
    if args.statistics {
        write!(out, "{report}")?;
    }
    if let Some(json_path) = args.json_path {
        let stats_file = fs::File::create(json_path)?;
        serde_json::to_writer_pretty(stats_file, &report)?;
    }
    Ok(())
}

/// Backing store, wrapped in one cache unless caching is disabled.
fn build_hierarchy(
    config: &Config,
    stats: &mut Statistics,
    disable_cache: bool,
) -> Result<Box<dyn AbstractMemory>, SimError> {
    let mem: Box<dyn AbstractMemory> = Box::new(Memory::from_config(config, None)?);
    if disable_cache {
        return Ok(mem);
    }
    let rnd = SeededRandom::from_config(config)?;
    info!("random seed {}", rnd.seed());
    Ok(cache::create(config, None, stats, mem, Box::new(rnd))?)
}

/// Replays one trace step. A read only learns timing from the hierarchy;
/// the recorded value is then revealed so every layer holds the truth.
fn operate(step: &TraceStep, mem: &mut dyn AbstractMemory, stats: &mut Statistics) {
    trace!("{:?} {:?} {:#x}+{}", step.op, step.kind, step.addr, step.size);
    match step.op {
        Op::Read => {
            stats.add_read();
            mem.read(stats, step.addr, step.size, None);
            if let Some(value) = step.value() {
                mem.reveal(step.addr, value);
            }
        }
        Op::Write => {
            stats.add_write();
            if let Some(value) = step.value() {
                mem.write(stats, step.addr, value);
            }
        }
    }
}
