use std::io;

use probe::assembler::active::{emit_mov_imm, emit_pop, emit_push, emit_ret};
use probe::{
    ExecutableMemory, Gpr, OverrideRegisters, ProbeConfig, ProbeEmitter, RegisterAssignment,
};
use probe_abi::Word;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CliConfig {
    assignments: Vec<String>,
    no_print: bool,
    trace_hits: bool,
    help: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli_args(&args).map_err(io::Error::other)?;
    if cli.help {
        print_usage();
        return Ok(());
    }
    init_logging()?;

    let assignments = cli
        .assignments
        .iter()
        .map(|raw| raw.parse::<RegisterAssignment>())
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(assignment) = assignments
        .iter()
        .find(|assignment| assignment.target.redirects_control())
    {
        return Err(io::Error::other(format!(
            "refusing to override {}: the demo function cannot resume elsewhere",
            assignment.target.name()
        ))
        .into());
    }

    let mut config = ProbeConfig::from_env()?;
    config.trace_hits |= cli.trace_hits;
    if !probe::probe_supported() || !config.enabled {
        return Err(io::Error::other(format!(
            "probes are unavailable (arch {}, enabled {})",
            std::env::consts::ARCH,
            config.enabled
        ))
        .into());
    }

    let mut emitter = ProbeEmitter::new(config);
    let code = build_demo_function(&mut emitter, assignments, !cli.no_print);
    let memory = ExecutableMemory::from_code(&code)?;
    info!(
        address = format_args!("{:#x}", memory.entry_address()),
        len = memory.len(),
        "running demo function"
    );
    // SAFETY: the demo takes no arguments, preserves callee-saved registers
    // and returns the scratch register; `emitter` outlives the call.
    let entry: extern "C" fn() -> usize = unsafe { memory.entry() };
    let result = entry();

    println!("scratch register on return: {result:#x}");
    print!("{}", emitter.dump_text());
    Ok(())
}

/// Seeds every general register with a recognizable pattern, then plants a
/// print probe, the override probe and a second print probe.
fn build_demo_function(
    emitter: &mut ProbeEmitter,
    assignments: Vec<RegisterAssignment>,
    print: bool,
) -> Vec<u8> {
    let saved: Vec<Gpr> = Gpr::ALL
        .iter()
        .copied()
        .filter(|gpr| *gpr != Gpr::STACK_POINTER && *gpr != Gpr::SCRATCH)
        .collect();

    let mut code = Vec::new();
    for gpr in &saved {
        emit_push(&mut code, *gpr);
    }
    for gpr in Gpr::ALL.iter().copied() {
        if gpr != Gpr::STACK_POINTER {
            emit_mov_imm(&mut code, gpr, seed_value(gpr));
        }
    }
    if print {
        emitter.insert_print_probe(&mut code, "before");
    }
    if !assignments.is_empty() {
        emitter.insert_labeled_probe(
            &mut code,
            Some("override".to_string()),
            OverrideRegisters::new(assignments),
        );
        if print {
            emitter.insert_print_probe(&mut code, "after");
        }
    }
    for gpr in saved.iter().rev() {
        emit_pop(&mut code, *gpr);
    }
    emit_ret(&mut code);
    code
}

fn seed_value(gpr: Gpr) -> Word {
    (gpr.index() as Word + 1) * 0x1111
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| io::Error::other(err.to_string()))?;
    Ok(())
}

fn parse_cli_args(args: &[String]) -> Result<CliConfig, String> {
    let mut cfg = CliConfig::default();
    let mut index = 0usize;
    while index < args.len() {
        let arg = args[index].as_str();
        match arg {
            "-h" | "--help" => {
                cfg.help = true;
                index += 1;
            }
            "--no-print" => {
                cfg.no_print = true;
                index += 1;
            }
            "--trace-hits" => {
                cfg.trace_hits = true;
                index += 1;
            }
            "--set" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --set".to_string())?
                    .clone();
                cfg.assignments.push(value);
                index += 2;
            }
            _ => {
                if let Some(value) = arg.strip_prefix("--set=") {
                    cfg.assignments.push(value.to_string());
                    index += 1;
                } else {
                    return Err(format!("unknown argument '{arg}'"));
                }
            }
        }
    }
    Ok(cfg)
}

fn print_usage() {
    println!("Usage:");
    println!("  pd-probe-run [--set <reg>=<value>]... [--no-print] [--trace-hits]");
    println!();
    println!("Runs a small JIT function with register-dump probes around an override probe.");
    println!("  --set <reg>=<value>  write a register from the probe (hex, decimal or float)");
    println!("  --no-print           skip the register dumps");
    println!("  --trace-hits         log every probe dispatch at trace level");
    println!();
    println!("Environment: PD_PROBE_ENABLED, PD_PROBE_TRACE_HITS, RUST_LOG");
}
