//! A runner that drives the emulator in real time on a worker thread.

use crate::{Address, Cinnabar, Cycles, Fault, clock::EE_FREQUENCY};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

/// EE cycles emulated per slice, about a millisecond worth.
const STEP_SIZE: Cycles = Cycles(EE_FREQUENCY / 1000);

#[inline(always)]
fn to_duration(cycles: Cycles) -> Duration {
    Duration::from_secs_f64(cycles.value() as f64 / EE_FREQUENCY as f64)
}

#[derive(Default)]
pub struct Stats {
    /// Instructions per second, for the last 1024 slices.
    pub ips: VecDeque<f32>,
    /// EE cycles emulated since the runner was created.
    pub cycles: Cycles,
}

pub struct State {
    cinnabar: Cinnabar,
    breakpoints: Vec<Address>,
    stats: Stats,
    fault: Option<Fault>,
}

impl State {
    pub fn new(cinnabar: Cinnabar) -> Self {
        Self {
            cinnabar,
            breakpoints: Vec::new(),
            stats: Stats::default(),
            fault: None,
        }
    }

    pub fn cinnabar(&self) -> &Cinnabar {
        &self.cinnabar
    }

    pub fn cinnabar_mut(&mut self) -> &mut Cinnabar {
        &mut self.cinnabar
    }

    pub fn into_cinnabar(self) -> Cinnabar {
        self.cinnabar
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn breakpoints(&self) -> &[Address] {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut Vec<Address> {
        &mut self.breakpoints
    }

    /// The fault that stopped emulation, if any.
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Takes the fault that stopped emulation, allowing it to be resumed.
    pub fn take_fault(&mut self) -> Option<Fault> {
        self.fault.take()
    }
}

struct Control {
    should_run: AtomicBool,
    should_exit: AtomicBool,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run(state: Arc<Mutex<State>>, control: Arc<Control>) {
    let mut next = Instant::now();
    let mut guard = lock(&state);
    'outer: loop {
        if !control.should_run.load(Ordering::Relaxed) {
            std::mem::drop(guard);

            while !control.should_run.load(Ordering::Relaxed) {
                if control.should_exit.load(Ordering::Relaxed) {
                    debug!("runner exiting");
                    return;
                }

                std::thread::park();
            }

            guard = lock(&state);
            next = next.max(Instant::now());
        }

        // wait until the next slice should run
        while next > Instant::now() {
            if !control.should_run.load(Ordering::Relaxed) {
                continue 'outer;
            }

            std::thread::yield_now();
        }

        // a fault halts emulation until it is taken
        if guard.fault.is_some() {
            control.should_run.store(false, Ordering::Relaxed);
            continue;
        }

        // emulate
        let state = &mut *guard;
        let executed = match state.cinnabar.exec(STEP_SIZE, &state.breakpoints) {
            Ok(executed) => executed,
            Err(fault) => {
                error!(%fault, cycle = state.cinnabar.system.scheduler.now(), "runner halted");
                state.fault = Some(fault);
                control.should_run.store(false, Ordering::Relaxed);
                continue;
            }
        };

        if executed.hit_breakpoint {
            info!("breakpoint hit");
            control.should_run.store(false, Ordering::Relaxed);
        }

        if state.stats.ips.len() >= 1024 {
            state.stats.ips.pop_back();
        }

        state
            .stats
            .ips
            .push_front(executed.instructions as f32 / next.elapsed().as_secs_f32());
        state.stats.cycles += executed.cycles;

        // calculate when the next slice should run
        next += to_duration(executed.cycles);

        // avoid acumulating slowdowns
        next = next.max(Instant::now());
    }
}

/// A simple runner for the Cinnabar emulator.
pub struct Runner {
    state: Arc<Mutex<State>>,
    control: Arc<Control>,
    handle: JoinHandle<()>,
}

impl Runner {
    pub fn new(cinnabar: Cinnabar) -> std::io::Result<Self> {
        let state = Arc::new(Mutex::new(State::new(cinnabar)));
        let control = Arc::new(Control {
            should_run: AtomicBool::new(false),
            should_exit: AtomicBool::new(false),
        });

        let handle = std::thread::Builder::new()
            .name("cinnabar-runner".to_owned())
            .spawn({
                let state = state.clone();
                let control = control.clone();

                || run(state, control)
            })?;

        Ok(Self {
            state,
            control,
            handle,
        })
    }

    pub fn running(&self) -> bool {
        self.control.should_run.load(Ordering::Relaxed)
    }

    pub fn set_run(&mut self, run: bool) {
        self.control.should_run.store(run, Ordering::Relaxed);
        if run {
            self.handle.thread().unpark();
        }
    }

    pub fn with_state<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut State) -> R,
    {
        let run = self.control.should_run.load(Ordering::Relaxed);
        self.control.should_run.store(false, Ordering::Relaxed);

        let mut state = lock(&self.state);
        let result = f(&mut state);

        // a fault recorded meanwhile keeps the runner stopped
        if run && state.fault.is_none() {
            self.control.should_run.store(true, Ordering::Relaxed);
            self.handle.thread().unpark();
        }

        result
    }

    /// Stops the worker thread and returns the final state.
    pub fn shutdown(self) -> Option<State> {
        self.control.should_run.store(false, Ordering::Relaxed);
        self.control.should_exit.store(true, Ordering::Relaxed);
        self.handle.thread().unpark();

        if self.handle.join().is_err() {
            error!("runner thread panicked");
        }

        Arc::into_inner(self.state)
            .map(|state| state.into_inner().unwrap_or_else(PoisonError::into_inner))
    }
}
