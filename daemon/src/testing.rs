//! In-process fakes for the engine, surface, topology and probe seams.
//!
//! Every fake is a cheap handle over shared state so tests can keep a clone
//! and inspect or steer what the code under test sees.

use crate::engine::{Engine, EngineEvent, EngineFactory, EngineState, FitRect};
use crate::monitors::{MonitorDescriptor, MonitorInventory, TopologySource};
use crate::player::Backends;
use crate::player::maximized::{MaximizedProbe, ProbeFactory};
use crate::surface::{Surface, SurfaceFactory, Visibility};
use anyhow::Result;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub fn monitor(index: usize, name: &str, x: i32, width: u32, height: u32) -> MonitorDescriptor {
    MonitorDescriptor {
        index,
        name: name.to_string(),
        x,
        y: 0,
        width,
        height,
    }
}

// Topology

#[derive(Debug, Default)]
struct TopologyState {
    monitors: Vec<MonitorDescriptor>,
    failing: bool,
    queries: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FakeTopology(Rc<RefCell<TopologyState>>);

impl FakeTopology {
    pub fn new(monitors: Vec<MonitorDescriptor>) -> Self {
        Self(Rc::new(RefCell::new(TopologyState {
            monitors,
            ..Default::default()
        })))
    }

    pub fn set(&self, monitors: Vec<MonitorDescriptor>) {
        let mut state = self.0.borrow_mut();
        state.monitors = monitors;
        state.failing = false;
    }

    pub fn fail(&self) {
        self.0.borrow_mut().failing = true;
    }

    pub fn queries(&self) -> u32 {
        self.0.borrow().queries
    }
}

impl TopologySource for FakeTopology {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn query(&self) -> Result<Vec<MonitorDescriptor>> {
        let mut state = self.0.borrow_mut();
        state.queries += 1;
        if state.failing {
            anyhow::bail!("topology unavailable");
        }
        Ok(state.monitors.clone())
    }
}

// Engine

#[derive(Debug)]
pub struct FakeEngineState {
    pub bound: Option<u32>,
    pub loaded: Option<PathBuf>,
    pub loads: u32,
    pub fail_load: bool,
    pub playing: bool,
    pub paused: bool,
    pub state: EngineState,
    pub time_ms: Option<u64>,
    pub length_ms: Option<u64>,
    pub volume: u32,
    pub rate: f64,
    /// Rates above this are silently capped
    pub max_rate: f64,
    pub reject_rates: bool,
    pub video_size: Option<(u32, u32)>,
    pub fits: Vec<FitRect>,
    pub events: VecDeque<EngineEvent>,
    pub seeks: Vec<f64>,
    pub stops: u32,
    pub set_paused_calls: u32,
}

impl Default for FakeEngineState {
    fn default() -> Self {
        Self {
            bound: None,
            loaded: None,
            loads: 0,
            fail_load: false,
            playing: false,
            paused: false,
            state: EngineState::Idle,
            time_ms: Some(1000),
            length_ms: None,
            volume: 0,
            rate: 1.0,
            max_rate: f64::MAX,
            reject_rates: false,
            video_size: Some((1920, 1080)),
            fits: Vec::new(),
            events: VecDeque::new(),
            seeks: Vec::new(),
            stops: 0,
            set_paused_calls: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeEngine(Rc<RefCell<FakeEngineState>>);

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> Ref<'_, FakeEngineState> {
        self.0.borrow()
    }

    pub fn inner_mut(&self) -> RefMut<'_, FakeEngineState> {
        self.0.borrow_mut()
    }

    pub fn push_event(&self, event: EngineEvent) {
        self.0.borrow_mut().events.push_back(event);
    }
}

impl Engine for FakeEngine {
    fn bind_window(&mut self, handle: u32) -> Result<()> {
        self.inner_mut().bound = Some(handle);
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let mut s = self.inner_mut();
        if s.fail_load {
            anyhow::bail!("cannot open {}", path.display());
        }
        s.loads += 1;
        s.loaded = Some(path.to_path_buf());
        s.state = EngineState::Opening;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let mut s = self.inner_mut();
        s.playing = true;
        s.paused = false;
        s.state = EngineState::Playing;
        s.events.push_back(EngineEvent::Playing);
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        let mut s = self.inner_mut();
        s.set_paused_calls += 1;
        s.paused = paused;
        s.playing = !paused;
        s.state = if paused {
            EngineState::Paused
        } else {
            EngineState::Playing
        };
        Ok(())
    }

    fn stop(&mut self) {
        let mut s = self.inner_mut();
        s.stops += 1;
        s.playing = false;
        s.state = EngineState::Stopped;
    }

    fn state(&self) -> EngineState {
        self.inner().state
    }

    fn time_ms(&self) -> Option<u64> {
        self.inner().time_ms
    }

    fn length_ms(&self) -> Option<u64> {
        self.inner().length_ms
    }

    fn seek_fraction(&mut self, fraction: f64) -> Result<()> {
        self.inner_mut().seeks.push(fraction);
        Ok(())
    }

    fn set_volume(&mut self, volume: u32) -> Result<()> {
        self.inner_mut().volume = volume;
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        let mut s = self.inner_mut();
        if s.reject_rates {
            anyhow::bail!("rate {} not supported", rate);
        }
        s.rate = rate.min(s.max_rate);
        Ok(())
    }

    fn rate(&self) -> f64 {
        self.inner().rate
    }

    fn video_size(&self) -> Option<(u32, u32)> {
        self.inner().video_size
    }

    fn apply_fit(&mut self, rect: FitRect) -> Result<()> {
        self.inner_mut().fits.push(rect);
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<EngineEvent> {
        self.inner_mut().events.drain(..).collect()
    }
}

/// Hands out [`FakeEngine`]s and remembers them in creation order.
#[derive(Clone, Default)]
pub struct FakeEngines {
    created: Rc<RefCell<Vec<FakeEngine>>>,
    max_rate: Rc<Cell<Option<f64>>>,
}

impl FakeEngines {
    /// Cap the rate of engines created from now on.
    pub fn max_rate(&self, rate: f64) {
        self.max_rate.set(Some(rate));
    }

    pub fn get(&self, i: usize) -> FakeEngine {
        self.created.borrow()[i].clone()
    }

    pub fn count(&self) -> usize {
        self.created.borrow().len()
    }
}

impl EngineFactory for FakeEngines {
    fn backend(&self) -> &str {
        "fake"
    }

    fn create(&self) -> Result<Box<dyn Engine>> {
        let engine = FakeEngine::new();
        if let Some(rate) = self.max_rate.get() {
            engine.inner_mut().max_rate = rate;
        }
        self.created.borrow_mut().push(engine.clone());
        Ok(Box::new(engine))
    }
}

// Surface

#[derive(Debug)]
pub struct FakeSurfaceState {
    pub handle: u32,
    pub exposed: bool,
    pub visibility: Visibility,
    pub placed: Vec<MonitorDescriptor>,
    pub shown: u32,
    pub lowered: u32,
    pub opacity: f64,
    pub closed: bool,
}

#[derive(Debug, Clone)]
pub struct FakeSurface(Rc<RefCell<FakeSurfaceState>>);

impl FakeSurface {
    fn new(handle: u32, exposed: bool) -> Self {
        Self(Rc::new(RefCell::new(FakeSurfaceState {
            handle,
            exposed,
            visibility: Visibility::Visible,
            placed: Vec::new(),
            shown: 0,
            lowered: 0,
            opacity: 1.0,
            closed: false,
        })))
    }

    pub fn handle(&self) -> u32 {
        self.0.borrow().handle
    }

    pub fn inner(&self) -> Ref<'_, FakeSurfaceState> {
        self.0.borrow()
    }

    pub fn inner_mut(&self) -> RefMut<'_, FakeSurfaceState> {
        self.0.borrow_mut()
    }
}

impl Surface for FakeSurface {
    fn native_handle(&self) -> u32 {
        self.handle()
    }

    fn place(&mut self, monitor: &MonitorDescriptor) -> Result<()> {
        self.inner_mut().placed.push(monitor.clone());
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        self.inner_mut().shown += 1;
        Ok(())
    }

    fn lower(&mut self) -> Result<()> {
        self.inner_mut().lowered += 1;
        Ok(())
    }

    fn is_exposed(&self) -> bool {
        self.inner().exposed
    }

    fn visibility(&self) -> Visibility {
        self.inner().visibility
    }

    fn set_opacity(&mut self, opacity: f64) -> Result<()> {
        self.inner_mut().opacity = opacity;
        Ok(())
    }

    fn close(&mut self) {
        self.inner_mut().closed = true;
    }
}

#[derive(Clone)]
pub struct FakeSurfaces {
    created: Rc<RefCell<Vec<FakeSurface>>>,
    exposed: Rc<Cell<bool>>,
}

impl Default for FakeSurfaces {
    fn default() -> Self {
        Self {
            created: Rc::default(),
            exposed: Rc::new(Cell::new(true)),
        }
    }
}

impl FakeSurfaces {
    pub fn exposed_by_default(&self, exposed: bool) {
        self.exposed.set(exposed);
    }

    pub fn get(&self, i: usize) -> FakeSurface {
        self.created.borrow()[i].clone()
    }
}

impl SurfaceFactory for FakeSurfaces {
    fn create(&self) -> Result<Box<dyn Surface>> {
        let handle = 0x40_0001 + self.created.borrow().len() as u32;
        let surface = FakeSurface::new(handle, self.exposed.get());
        self.created.borrow_mut().push(surface.clone());
        Ok(Box::new(surface))
    }
}

// Maximized probe

/// Answers every query with the value last set; shared by all its clones.
#[derive(Debug, Clone, Default)]
pub struct FakeProbe(Rc<Cell<Option<bool>>>);

impl FakeProbe {
    pub fn set(&self, answer: Option<bool>) {
        self.0.set(answer);
    }
}

impl MaximizedProbe for FakeProbe {
    fn is_maximized(&mut self, _monitor: &MonitorDescriptor, _now: Instant) -> Option<bool> {
        self.0.get()
    }
}

impl ProbeFactory for FakeProbe {
    fn create(&self) -> Box<dyn MaximizedProbe> {
        Box::new(self.clone())
    }
}

/// Fake backends plus an inventory over two fake topology sources.
pub struct Harness {
    pub backends: Backends,
    pub inventory: MonitorInventory,
    pub topology: FakeTopology,
    pub native: FakeTopology,
    pub engines: FakeEngines,
    pub surfaces: FakeSurfaces,
    pub probe: FakeProbe,
}

impl Harness {
    pub fn new(monitors: Vec<MonitorDescriptor>) -> Self {
        let topology = FakeTopology::new(monitors.clone());
        let native = FakeTopology::new(monitors);
        let engines = FakeEngines::default();
        let surfaces = FakeSurfaces::default();
        let probe = FakeProbe::default();

        Self {
            backends: Backends {
                engines: Box::new(engines.clone()),
                surfaces: Box::new(surfaces.clone()),
                probes: Box::new(probe.clone()),
            },
            inventory: MonitorInventory::new(
                Box::new(topology.clone()),
                Box::new(native.clone()),
                Duration::from_secs(5),
            ),
            topology,
            native,
            engines,
            surfaces,
            probe,
        }
    }

    pub fn engine(&self, i: usize) -> FakeEngine {
        self.engines.get(i)
    }

    pub fn surface(&self, i: usize) -> FakeSurface {
        self.surfaces.get(i)
    }

    /// Split into the parts a service takes ownership of, keeping handles.
    pub fn into_parts(self) -> (Backends, MonitorInventory) {
        (self.backends, self.inventory)
    }
}
