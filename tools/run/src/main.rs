//! dbt-run: run a raw big-endian guest image under the translator.
//!
//! The image is copied into guest RAM at the load address and
//! executed from the entry address until it calls `exit`, hits an
//! illegal instruction, or the optional step limit runs out.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::{Parser, ValueEnum};
use dbt_core::dump::dump_insts;
use dbt_exec::{write_profile, CoreMode, Engine, EngineConfig, InsnFamily, Strategy};
use dbt_frontend::PpcGuest;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Ir,
    Direct,
    /// No translation: interpret one instruction at a time.
    Interp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FamilyArg {
    Integer,
    LoadStore,
    SystemRegisters,
    Branch,
}

impl From<FamilyArg> for InsnFamily {
    fn from(arg: FamilyArg) -> Self {
        match arg {
            FamilyArg::Integer => InsnFamily::Integer,
            FamilyArg::LoadStore => InsnFamily::LoadStore,
            FamilyArg::SystemRegisters => InsnFamily::SystemRegisters,
            FamilyArg::Branch => InsnFamily::Branch,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "dbt-run", about = "Run a guest image under the binary translator")]
struct Args {
    /// Raw guest image.
    image: PathBuf,

    /// Guest address the image is loaded at.
    #[arg(long, value_parser = parse_addr, default_value = "0x1000")]
    load: u32,

    /// Entry point; defaults to the load address.
    #[arg(long, value_parser = parse_addr)]
    entry: Option<u32>,

    /// Engine configuration as JSON; flags below override it.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Maximum guest instructions per block.
    #[arg(long)]
    max_insns: Option<u32>,

    /// Guest RAM size in MiB.
    #[arg(long, value_name = "MIB")]
    ram: Option<usize>,

    /// Disable direct block linking.
    #[arg(long)]
    no_link: bool,

    /// Compile blocks made only of interpreter calls.
    #[arg(long)]
    jit_off: bool,

    /// Interpret this instruction family instead of compiling it.
    #[arg(long, value_enum, value_name = "FAMILY")]
    interpret: Vec<FamilyArg>,

    /// Flush the block cache before every compilation.
    #[arg(long)]
    no_block_cache: bool,

    /// Count block runs and print the costliest blocks at exit.
    #[arg(long)]
    profile: bool,

    /// Print engine counters as JSON at exit.
    #[arg(long)]
    stats: bool,

    /// Translate the entry block, print its IR, and exit.
    #[arg(long)]
    dump_ir: bool,

    /// Do not copy guest output to stdout.
    #[arg(long, short)]
    quiet: bool,
}

fn parse_addr(s: &str) -> Result<u32, String> {
    let r = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    r.map_err(|e| format!("bad address {s:?}: {e}"))
}

fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    match args.strategy {
        Some(StrategyArg::Ir) => config.strategy = Strategy::Ir,
        Some(StrategyArg::Direct) => config.strategy = Strategy::Direct,
        Some(StrategyArg::Interp) => config.core = CoreMode::Interpreter,
        None => {}
    }
    if let Some(n) = args.max_insns {
        config.max_block_insns = n;
    }
    if let Some(mib) = args.ram {
        config.guest_ram_size = mib * dbt_exec::config::MIB;
    }
    if args.no_link {
        config.block_linking = false;
    }
    if args.jit_off {
        config.jit_off = true;
    }
    for &family in &args.interpret {
        let family = InsnFamily::from(family);
        if !config.disabled_families.contains(&family) {
            config.disabled_families.push(family);
        }
    }
    if args.no_block_cache {
        config.no_block_cache = true;
    }
    if args.profile {
        config.profiling = true;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let image = fs::read(&args.image).with_context(|| format!("reading {}", args.image.display()))?;
    let ram = config.guest_ram_size;
    if args.load as usize + image.len() > ram {
        bail!(
            "image of {} bytes at {:#x} does not fit in {} bytes of guest RAM",
            image.len(),
            args.load,
            ram
        );
    }

    let mut engine = Engine::new(config, PpcGuest::with_echo(!args.quiet))?;
    engine.memory_mut().load(args.load, &image);
    let entry = args.entry.unwrap_or(args.load);
    let state = engine.state_mut();
    state.pc = entry;
    // Stack at the top of RAM.
    state.gpr[1] = (ram - 16) as u32;
    info!(bytes = image.len(), "loaded {} at {:#x}", args.image.display(), args.load);

    if args.dump_ir {
        if engine.config().strategy != Strategy::Ir {
            bail!("--dump-ir needs the ir strategy");
        }
        engine.translate(entry)?;
        let mut out = io::stdout().lock();
        dump_insts(engine.last_ir(), &mut out)?;
        return Ok(());
    }

    engine.run()?;

    let mut out = io::stdout().lock();
    if args.stats {
        serde_json::to_writer_pretty(&mut out, &engine.stats())?;
        writeln!(out)?;
    }
    if args.profile {
        write_profile(&mut out, &engine.profile())?;
    }
    out.flush()?;

    let guest = engine.guest();
    if let Some(pc) = guest.fault {
        bail!("illegal instruction at {pc:#010x}");
    }
    std::process::exit(guest.exit_code.unwrap_or(0) as i32);
}
