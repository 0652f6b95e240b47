mod cli;
mod demo;

use bytesize::ByteSize;
use cinnabar::{
    Cinnabar, Primitive,
    cores::Cores,
    runner::Runner,
    system::{self, Modules, dmac::iop::IopChannel, mem::Bios},
};
use clap::Parser;
use cores::{IdleCore, ScriptCore};
use eyre_pretty::eyre::{Result, bail, eyre};
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::info;

fn setup_tracing(path: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let file = std::fs::File::options()
        .truncate(true)
        .create(true)
        .write(true)
        .open(path)?;

    let (file_nb, _guard_file) = tracing_appender::non_blocking(file);
    let file_layer = fmt::layer().with_writer(file_nb).with_ansi(false);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or(EnvFilter::new("app=debug,cinnabar=debug,cores=debug,common=debug"));

    let subscriber = tracing_subscriber::registry()
        .with(file_layer)
        .with(env_filter);

    subscriber.init();

    Ok(_guard_file)
}

fn idle_cores() -> Cores {
    Cores {
        ee: Box::new(IdleCore),
        iop: Box::new(IdleCore),
    }
}

fn run(config: &cli::RunConfig) -> Result<()> {
    let bios = match &config.bios {
        Some(path) => {
            let bios = Bios::open(path)?;
            info!(size = %ByteSize(bios.as_bytes().len() as u64), "loaded boot ROM");
            Some(bios)
        }
        None => None,
    };

    let vsyncs = Arc::new(AtomicU64::new(0));
    let cinnabar = Cinnabar::new(
        idle_cores(),
        Modules::default(),
        system::Config {
            bios,
            vsync_callback: Some(Box::new({
                let vsyncs = vsyncs.clone();
                move || {
                    vsyncs.fetch_add(1, Ordering::Relaxed);
                }
            })),
        },
    );

    let start = Instant::now();
    let cinnabar = if let Some(ticks) = config.ticks {
        let mut cinnabar = cinnabar;
        for _ in 0..ticks {
            cinnabar.tick(config.instructions_per_tick)?;
        }

        cinnabar
    } else {
        let mut runner = Runner::new(cinnabar)?;
        runner.set_run(true);
        std::thread::sleep(Duration::from_secs_f64(config.seconds));
        runner.set_run(false);

        let Some(mut state) = runner.shutdown() else {
            bail!("runner state is still shared");
        };

        if let Some(fault) = state.take_fault() {
            return Err(fault.into());
        }

        let ips = state.stats().ips.iter().sum::<f32>() / state.stats().ips.len().max(1) as f32;
        info!(ips, "runner stopped");

        state.into_cinnabar()
    };

    let sys = &cinnabar.system;
    println!(
        "emulated {} EE cycles in {:?}",
        sys.scheduler.now(),
        start.elapsed()
    );
    println!("frames: {}", sys.video.frames);
    println!("vsyncs: {}", vsyncs.load(Ordering::Relaxed));
    println!("fingerprint: 0x{:016X}", sys.fingerprint());

    Ok(())
}

fn sif_demo() -> Result<()> {
    let ee = ScriptCore::new(demo::ee_script());
    let iop = ScriptCore::new(demo::iop_script());
    let cores = Cores {
        ee: Box::new(ee),
        iop: Box::new(iop),
    };

    let mut cinnabar = Cinnabar::new(cores, Modules::default(), system::Config::default());

    let mut started = false;
    let mut ticks = 0;
    loop {
        cinnabar.tick(16)?;
        ticks += 1;

        let start = cinnabar.system.iop_dmac.channel(IopChannel::Sif0).chcr.start();
        started |= start;
        if started && !start {
            break;
        }

        if ticks == 10_000 {
            return Err(eyre!("SIF0 transfer did not finish"));
        }
    }

    let sys = &cinnabar.system;
    println!("transfer finished after {ticks} ticks");
    for (i, expected) in demo::WORDS.iter().enumerate() {
        let offset = i * 4;
        let source = u32::read_le_bytes(&sys.mem.iop_ram[demo::SOURCE as usize + offset..]);
        let target = u32::read_le_bytes(&sys.mem.ee_ram[demo::TARGET as usize + offset..]);
        println!("word {i}: IOP 0x{source:08X} -> EE 0x{target:08X}");

        if target != *expected {
            bail!("word {i} arrived as 0x{target:08X}, expected 0x{expected:08X}");
        }
    }

    println!("IOP DICR2 flags: 0b{:07b}", sys.iop_dmac.dicr2.flags().value());
    println!("IOP I_STAT: 0x{:08X}", sys.iop_intc.stat);
    println!("EE D_STAT: 0x{:08X}", sys.ee_dmac.stat.to_bits());

    Ok(())
}

fn main() -> Result<()> {
    eyre_pretty::install()?;

    let config = cli::Config::parse();
    let _tracing_guard = setup_tracing(&config.log)?;

    match &config.command {
        cli::Command::Run(run_config) => run(run_config),
        cli::Command::SifDemo => sif_demo(),
    }
}
