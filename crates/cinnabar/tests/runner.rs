use cinnabar::{
    Address, Cinnabar, Cycles, Fault,
    cores::{Cores, EeCore, Executed, IopCore},
    runner::Runner,
    system::{Config, Modules, System},
};
use std::time::{Duration, Instant};

/// Retires the requested cycles. Faults once `fault_at` EE cycles have passed, if set.
struct TestCore {
    fault_at: Option<u64>,
}

impl EeCore for TestCore {
    fn exec(&mut self, sys: &mut System, cycles: Cycles, _: &[Address]) -> Result<Executed, Fault> {
        if self.fault_at.is_some_and(|at| sys.scheduler.now() >= at) {
            sys.ee_write::<u32>(Address(0x1F00_0000), 0)?;
        }

        Ok(Executed {
            instructions: cycles.value() as u32,
            cycles,
            hit_breakpoint: false,
        })
    }

    fn step(&mut self, sys: &mut System) -> Result<Executed, Fault> {
        EeCore::exec(self, sys, Cycles(1), &[])
    }
}

impl IopCore for TestCore {
    fn exec(&mut self, _: &mut System, cycles: Cycles) -> Result<Executed, Fault> {
        Ok(Executed {
            instructions: cycles.value() as u32,
            cycles,
            hit_breakpoint: false,
        })
    }
}

fn runner(fault_at: Option<u64>) -> Runner {
    let cores = Cores {
        ee: Box::new(TestCore { fault_at }),
        iop: Box::new(TestCore { fault_at: None }),
    };

    Runner::new(Cinnabar::new(cores, Modules::default(), Config::default())).unwrap()
}

fn wait_until(runner: &mut Runner, mut done: impl FnMut(&mut Runner) -> bool) {
    let start = Instant::now();
    while !done(runner) {
        assert!(start.elapsed() < Duration::from_secs(10), "timed out");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn runs_only_when_asked() {
    let mut runner = runner(None);
    std::thread::sleep(Duration::from_millis(20));
    assert!(!runner.running());
    assert_eq!(runner.with_state(|state| state.stats().cycles), Cycles::ZERO);

    runner.set_run(true);
    wait_until(&mut runner, |r| {
        r.with_state(|state| state.stats().cycles > Cycles::ZERO)
    });

    runner.set_run(false);
    let state = runner.shutdown().unwrap();
    let now = state.cinnabar().system.scheduler.now();
    assert_eq!(Cycles(now), state.stats().cycles);
    assert!(state.fault().is_none());
}

#[test]
fn stops_on_first_fault() {
    let mut runner = runner(Some(1_000_000));
    runner.set_run(true);
    wait_until(&mut runner, |r| !r.running());

    let mut state = runner.shutdown().unwrap();
    assert!(matches!(state.take_fault(), Some(Fault::Unmapped { .. })));
    assert!(state.cinnabar().system.scheduler.now() >= 1_000_000);
}
