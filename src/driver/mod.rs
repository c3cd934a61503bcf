//! Simulation driver: owns the grid and the process components and advances model time.
//!
//! A step runs the configured [`StageOrder`] once. Any stage failure aborts the step,
//! restores every node field to its state before the step, and surfaces as
//! [`LemError::Stage`] carrying the stage name and model time.
//!
//! State machine: `Uninitialized -> Ready -> Running -> Done`. A driver without a grid is
//! `Uninitialized`; `Done` is reached once `elapsed >= total_time` or when a storm sequence
//! runs out early.

pub mod checkpoint;
pub mod stage;

use std::fmt;

use ndarray::Array2;
use tracing::{debug, error, info, warn};

use crate::channel::{ChiFinder, SteepnessFinder};
use crate::config::ModelParams;
use crate::erosion::{LinearDiffuser, StreamPowerEroder};
use crate::error::{LemError, Result};
use crate::flow::{FlowDirector, FlowGraph, FlowRouter, SinkFiller};
use crate::grid::{Field, RasterGrid};
use crate::storms::StormInterval;
use crate::tectonics::UpliftForcing;

pub use checkpoint::Checkpoint;
pub use stage::{
    FillPolicy, FillTarget, Process, Stage, StageOrder, StepContext, StepReport, StormCoupling,
};

/// Lifecycle of a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Ready,
    Running,
    Done,
}

/// Scheduling and coupling choices that are not physical parameters.
#[derive(Clone, Debug, Default)]
pub struct DriverOptions {
    pub director: FlowDirector,
    pub stage_order: StageOrder,
    pub fill_policy: FillPolicy,
    pub fill_target: FillTarget,
    pub storm_coupling: StormCoupling,
    /// Steps between progress records; defaults to a fiftieth of the run.
    pub output_interval: Option<usize>,
}

/// Diagnostics collected after a step.
#[derive(Clone, Debug, PartialEq)]
pub struct StepDiagnostics {
    pub step: u64,
    /// Model time at the end of the step.
    pub time: f64,
    pub dt: f64,
    pub mean_elevation: f64,
    pub max_elevation: f64,
    /// Drainage area delivered to outlets by this step's routing (0 if not routed).
    pub outlet_area: f64,
    /// False for steps taken during an interstorm interval.
    pub transport_active: bool,
    pub report: StepReport,
}

impl fmt::Display for StepDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[step {:>5}] t={:.3} dt={:.3} h_mean={:.4} h_max={:.4} substeps={} fallbacks={}",
            self.step,
            self.time,
            self.dt,
            self.mean_elevation,
            self.max_elevation,
            self.report.diffusion_substeps,
            self.report.newton_fallbacks,
        )
    }
}

/// Outcome of a full run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub steps: u64,
    pub elapsed: f64,
    /// The storm sequence ended before `total_time`.
    pub exhausted: bool,
    /// Diagnostics recorded at each output interval and at the final step.
    pub diagnostics: Vec<StepDiagnostics>,
}

/// Builder for [`SimulationDriver`]. Components not supplied are derived from the params.
#[derive(Clone, Debug)]
pub struct DriverBuilder {
    params: ModelParams,
    options: DriverOptions,
    grid: Option<RasterGrid>,
    diffuser: Option<LinearDiffuser>,
    eroder: Option<StreamPowerEroder>,
    uplift: Option<UpliftForcing>,
    clock: Option<(f64, u64)>,
}

impl DriverBuilder {
    pub fn grid(mut self, grid: RasterGrid) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn stage_order(mut self, order: StageOrder) -> Self {
        self.options.stage_order = order;
        self
    }

    pub fn fill_policy(mut self, policy: FillPolicy) -> Self {
        self.options.fill_policy = policy;
        self
    }

    pub fn fill_target(mut self, target: FillTarget) -> Self {
        self.options.fill_target = target;
        self
    }

    pub fn director(mut self, director: FlowDirector) -> Self {
        self.options.director = director;
        self
    }

    /// Multi-flow-direction routing with the `mfd_exponent` from the params.
    pub fn mfd(mut self) -> Self {
        self.options.director = FlowDirector::Mfd { exponent: self.params.mfd_exponent };
        self
    }

    pub fn storm_coupling(mut self, coupling: StormCoupling) -> Self {
        self.options.storm_coupling = coupling;
        self
    }

    pub fn output_interval(mut self, steps: usize) -> Self {
        self.options.output_interval = Some(steps.max(1));
        self
    }

    pub fn diffuser(mut self, diffuser: LinearDiffuser) -> Self {
        self.diffuser = Some(diffuser);
        self
    }

    pub fn eroder(mut self, eroder: StreamPowerEroder) -> Self {
        self.eroder = Some(eroder);
        self
    }

    pub fn uplift(mut self, uplift: UpliftForcing) -> Self {
        self.uplift = Some(uplift);
        self
    }

    /// Resume from a checkpoint: its grid and clock replace any set so far.
    pub fn checkpoint(mut self, checkpoint: &Checkpoint) -> Result<Self> {
        self.grid = Some(checkpoint.to_grid()?);
        self.clock = Some((checkpoint.elapsed, checkpoint.steps));
        Ok(self)
    }

    pub fn build(self) -> Result<SimulationDriver> {
        let params = self.params;
        params.validate()?;

        let filler = SinkFiller::new(params.fill_epsilon)?;
        let router = FlowRouter::new(self.options.director)?;
        let diffuser = match self.diffuser {
            Some(d) => d,
            None => LinearDiffuser::from_params(&params)?,
        };
        let eroder = match self.eroder {
            Some(e) => e,
            None => StreamPowerEroder::from_params(&params)?,
        };
        let uplift = match self.uplift {
            Some(u) => u,
            None => UpliftForcing::uniform(params.uplift_rate)?,
        };
        let (elapsed, steps) = self.clock.unwrap_or((0.0, 0));

        let mut driver = SimulationDriver {
            state: DriverState::Uninitialized,
            grid: None,
            params,
            options: self.options,
            filler,
            router,
            diffuser,
            eroder,
            uplift,
            elapsed,
            steps,
            filled_once: steps > 0,
            last_flow: None,
            history: Vec::new(),
        };
        if let Some(grid) = self.grid {
            driver.set_grid(grid)?;
        }
        Ok(driver)
    }
}

/// The landscape evolution model.
#[derive(Debug)]
pub struct SimulationDriver {
    state: DriverState,
    grid: Option<RasterGrid>,
    params: ModelParams,
    options: DriverOptions,
    filler: SinkFiller,
    router: FlowRouter,
    diffuser: LinearDiffuser,
    eroder: StreamPowerEroder,
    uplift: UpliftForcing,
    elapsed: f64,
    steps: u64,
    filled_once: bool,
    last_flow: Option<FlowGraph>,
    history: Vec<StepDiagnostics>,
}

impl SimulationDriver {
    pub fn builder(params: ModelParams) -> DriverBuilder {
        DriverBuilder {
            params,
            options: DriverOptions::default(),
            grid: None,
            diffuser: None,
            eroder: None,
            uplift: None,
            clock: None,
        }
    }

    /// Driver over `grid` with default options, ready to step.
    pub fn new(grid: RasterGrid, params: ModelParams) -> Result<Self> {
        Self::builder(params).grid(grid).build()
    }

    /// Flat `nrows x ncols` grid at spacing `dx` with open edges, roughened with
    /// `seed`-reproducible noise of amplitude `1e-5`.
    pub fn from_params(params: ModelParams) -> Result<Self> {
        let mut grid = RasterGrid::new(params.nrows, params.ncols, params.dx)?;
        grid.set_open_boundaries();
        crate::synthetic::random_roughness(&mut grid, 1e-5, params.seed)?;
        Self::new(grid, params)
    }

    /// Continue a run from a checkpoint with default options.
    pub fn resume(checkpoint: &Checkpoint, params: ModelParams) -> Result<Self> {
        Self::builder(params).checkpoint(checkpoint)?.build()
    }

    /// Attach (or replace) the grid before the run starts.
    pub fn set_grid(&mut self, grid: RasterGrid) -> Result<()> {
        if self.state == DriverState::Running {
            return Err(LemError::configuration("cannot replace the grid of a running model"));
        }
        if grid.rows() != self.params.nrows || grid.cols() != self.params.ncols {
            debug!(
                rows = grid.rows(),
                cols = grid.cols(),
                "grid shape differs from nrows/ncols; using the grid"
            );
        }
        self.grid = Some(grid);
        self.last_flow = None;
        self.state = if self.is_finished() { DriverState::Done } else { DriverState::Ready };
        Ok(())
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    pub fn grid(&self) -> Option<&RasterGrid> {
        self.grid.as_ref()
    }

    /// Mutable grid access between steps (e.g. to impose an extra perturbation).
    pub fn grid_mut(&mut self) -> Option<&mut RasterGrid> {
        self.last_flow = None;
        self.grid.as_mut()
    }

    /// Most recently routed flow graph.
    pub fn flow_graph(&self) -> Option<&FlowGraph> {
        self.last_flow.as_ref()
    }

    /// Diagnostics recorded by [`run`](Self::run) and [`run_with_storms`](Self::run_with_storms).
    pub fn history(&self) -> &[StepDiagnostics] {
        &self.history
    }

    pub fn field(&self, field: Field) -> Result<&[f64]> {
        Ok(self.require_grid()?.field(field))
    }

    pub fn field_array(&self, field: Field) -> Result<Array2<f64>> {
        self.require_grid()?.field_array(field)
    }

    fn require_grid(&self) -> Result<&RasterGrid> {
        self.grid
            .as_ref()
            .ok_or_else(|| LemError::configuration("driver has no grid; attach one first"))
    }

    fn is_finished(&self) -> bool {
        let total = self.params.total_time;
        self.elapsed >= total - 1e-9 * total.max(1.0)
    }

    fn output_interval(&self) -> usize {
        self.options
            .output_interval
            .unwrap_or_else(|| (self.params.n_steps() / 50).max(1))
    }

    /// Advance by `dt` with transport active.
    pub fn step(&mut self, dt: f64) -> Result<StepDiagnostics> {
        self.advance(dt, 1.0)
    }

    /// Advance over one storm or interstorm interval.
    pub fn step_interval(&mut self, interval: StormInterval) -> Result<StepDiagnostics> {
        self.advance(interval.duration, interval.intensity)
    }

    fn advance(&mut self, dt: f64, intensity: f64) -> Result<StepDiagnostics> {
        match self.state {
            DriverState::Uninitialized => {
                return Err(LemError::configuration("driver has no grid; attach one first"))
            }
            DriverState::Done => {
                return Err(LemError::configuration(format!(
                    "simulation already finished at t={}",
                    self.elapsed
                )))
            }
            DriverState::Ready | DriverState::Running => {}
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(LemError::invalid("dt", dt, "must be finite and > 0"));
        }
        if !(intensity.is_finite() && intensity >= 0.0) {
            return Err(LemError::invalid("rainfall_intensity", intensity, "must be finite and >= 0"));
        }

        let fill_now = match self.options.fill_policy {
            FillPolicy::EveryStep => true,
            FillPolicy::Once => !self.filled_once,
            FillPolicy::Never => false,
        };
        let raining = intensity > 0.0;
        let rainfall = match self.options.storm_coupling {
            StormCoupling::Gate => 1.0,
            StormCoupling::ScaledDischarge => intensity,
        };
        let time = self.elapsed;
        let prior_state = self.state;

        let grid = self
            .grid
            .as_mut()
            .ok_or_else(|| LemError::configuration("driver has no grid; attach one first"))?;
        let snapshot: Vec<Vec<f64>> = Field::ALL.iter().map(|&f| grid.field(f).to_vec()).collect();
        self.state = DriverState::Running;

        let mut ctx = StepContext {
            grid,
            routing_surface: None,
            flow: None,
            fill_target: self.options.fill_target,
            rainfall,
            time,
            report: StepReport::default(),
        };

        for &stage in self.options.stage_order.stages() {
            if (stage == Stage::SinkFill && !fill_now) || (stage.is_transport() && !raining) {
                continue;
            }
            let process: &dyn Process = match stage {
                Stage::SinkFill => &self.filler,
                Stage::Route => &self.router,
                Stage::Diffuse => &self.diffuser,
                Stage::Erode => &self.eroder,
                Stage::Uplift => &self.uplift,
            };
            if let Err(e) = process.apply(&mut ctx, dt) {
                for (&field, saved) in Field::ALL.iter().zip(&snapshot) {
                    ctx.grid.field_mut(field).copy_from_slice(saved);
                }
                self.state = prior_state;
                error!(stage = stage.name(), time, error = %e, "step failed; fields restored");
                return Err(e.in_stage(stage.name(), time));
            }
            debug!(stage = process.stage().name(), time, "stage complete");
            ctx.report.stages_run.push(process.stage());
        }

        let StepContext { flow, report, .. } = ctx;
        if report.stages_run.contains(&Stage::SinkFill) {
            self.filled_once = true;
        }
        self.elapsed += dt;
        self.steps += 1;

        let outlet_area = flow.as_ref().map_or(0.0, |g| g.outlet_area_total());
        if flow.is_some() {
            self.last_flow = flow;
        }

        let grid = self.require_grid()?;
        let core = grid.core_nodes();
        let z = grid.elevation();
        let (sum, max) = core
            .iter()
            .fold((0.0, f64::NEG_INFINITY), |(s, m), &i| (s + z[i], m.max(z[i])));
        let diagnostics = StepDiagnostics {
            step: self.steps,
            time: self.elapsed,
            dt,
            mean_elevation: if core.is_empty() { 0.0 } else { sum / core.len() as f64 },
            max_elevation: if core.is_empty() { 0.0 } else { max },
            outlet_area,
            transport_active: raining,
            report,
        };

        if self.is_finished() {
            self.state = DriverState::Done;
        }
        Ok(diagnostics)
    }

    /// Fixed-`dt` run to `total_time`; the last step is shortened to land on it exactly.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.require_grid()?;
        let dt = self.params.dt;
        let interval = self.output_interval();
        info!(
            rows = self.params.nrows,
            cols = self.params.ncols,
            dt,
            total_time = self.params.total_time,
            n_steps = self.params.n_steps(),
            "starting run"
        );

        let mut summary = RunSummary::default();
        while self.state != DriverState::Done {
            let remaining = self.params.total_time - self.elapsed;
            let diagnostics = self.step(dt.min(remaining))?;
            self.record(diagnostics, interval, &mut summary);
        }
        summary.steps = self.steps;
        summary.elapsed = self.elapsed;
        info!(steps = self.steps, elapsed = self.elapsed, "run complete");
        Ok(summary)
    }

    /// Run driven by a storm sequence until `total_time`. If the sequence ends first the
    /// driver stops in `Done` and the summary is flagged `exhausted`.
    pub fn run_with_storms<I>(&mut self, storms: I) -> Result<RunSummary>
    where
        I: IntoIterator<Item = StormInterval>,
    {
        self.require_grid()?;
        let interval = self.output_interval();
        let mut storms = storms.into_iter();
        let mut summary = RunSummary::default();

        while self.state != DriverState::Done {
            let Some(storm) = storms.next() else {
                let err = LemError::ExhaustedInput {
                    elapsed: self.elapsed,
                    requested: self.params.total_time,
                };
                warn!(error = %err, "storm sequence ended early; stopping");
                self.state = DriverState::Done;
                summary.exhausted = true;
                break;
            };
            let remaining = self.params.total_time - self.elapsed;
            let duration = storm.duration.min(remaining);
            if duration <= 0.0 {
                continue;
            }
            let diagnostics = self.step_interval(StormInterval { duration, ..storm })?;
            self.record(diagnostics, interval, &mut summary);
        }
        summary.steps = self.steps;
        summary.elapsed = self.elapsed;
        info!(steps = self.steps, elapsed = self.elapsed, exhausted = summary.exhausted, "run complete");
        Ok(summary)
    }

    fn record(&mut self, diagnostics: StepDiagnostics, interval: usize, summary: &mut RunSummary) {
        if diagnostics.report.newton_fallbacks > 0 {
            warn!(
                step = diagnostics.step,
                fallbacks = diagnostics.report.newton_fallbacks,
                "erosion fell back to receiver clamp"
            );
        }
        let done = self.state == DriverState::Done;
        if diagnostics.step % interval as u64 == 0 || done {
            info!("{diagnostics}");
            self.history.push(diagnostics.clone());
            summary.diagnostics.push(diagnostics);
        }
    }

    /// Snapshot the current state.
    pub fn checkpoint(&self) -> Result<Checkpoint> {
        Ok(Checkpoint::capture(self.require_grid()?, self.elapsed, self.steps))
    }

    /// Re-route the current surface and refresh `channel__steepness_index` and
    /// `channel__chi_index`.
    pub fn compute_channel_indices(
        &mut self,
        theta: f64,
        min_area: f64,
        reference_area: f64,
    ) -> Result<()> {
        let steepness = SteepnessFinder::new(theta, min_area)?;
        let chi = ChiFinder::new(theta, min_area, reference_area)?;
        let surface = match self.options.fill_policy {
            FillPolicy::Never => None,
            FillPolicy::EveryStep | FillPolicy::Once => {
                Some(self.filler.filled_surface(self.require_grid()?)?.0)
            }
        };
        let grid = self
            .grid
            .as_mut()
            .ok_or_else(|| LemError::configuration("driver has no grid; attach one first"))?;
        let graph = self.router.route_surface(grid, surface.as_deref())?;
        steepness.calculate(grid, &graph)?;
        chi.calculate(grid, &graph)?;
        self.last_flow = Some(graph);
        Ok(())
    }
}
