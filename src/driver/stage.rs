//! Stage vocabulary of a driver step and the common process interface.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::erosion::{LinearDiffuser, StreamPowerEroder};
use crate::error::{LemError, Result};
use crate::flow::{FlowGraph, FlowRouter, SinkFiller};
use crate::grid::RasterGrid;
use crate::tectonics::UpliftForcing;

/// One process within a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    SinkFill,
    Route,
    Diffuse,
    Erode,
    Uplift,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::SinkFill => "sink_fill",
            Stage::Route => "route",
            Stage::Diffuse => "diffuse",
            Stage::Erode => "erode",
            Stage::Uplift => "uplift",
        }
    }

    /// Stages that move material and are skipped while it is not raining.
    pub fn is_transport(self) -> bool {
        matches!(self, Stage::Diffuse | Stage::Erode)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated order of stages within a step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Stage>", into = "Vec<Stage>")]
pub struct StageOrder(Vec<Stage>);

impl Default for StageOrder {
    /// Fill, route, diffuse, erode, uplift.
    fn default() -> Self {
        Self(vec![Stage::SinkFill, Stage::Route, Stage::Diffuse, Stage::Erode, Stage::Uplift])
    }
}

impl StageOrder {
    /// Each stage at most once; routing after filling; erosion after routing.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        let position = |s: Stage| stages.iter().position(|&x| x == s);
        for (k, s) in stages.iter().enumerate() {
            if stages[..k].contains(s) {
                return Err(LemError::configuration(format!("stage '{s}' appears more than once")));
            }
        }
        if let (Some(fill), Some(route)) = (position(Stage::SinkFill), position(Stage::Route)) {
            if route < fill {
                return Err(LemError::configuration("route must come after sink_fill"));
            }
        }
        if let Some(erode) = position(Stage::Erode) {
            match position(Stage::Route) {
                Some(route) if route < erode => {}
                _ => return Err(LemError::configuration("erode needs route earlier in the step")),
            }
        }
        Ok(Self(stages))
    }

    /// Diffuse before routing: uplift, diffuse, fill, route, erode.
    pub fn diffuse_first() -> Self {
        Self(vec![Stage::Uplift, Stage::Diffuse, Stage::SinkFill, Stage::Route, Stage::Erode])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.0
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0.contains(&stage)
    }
}

impl TryFrom<Vec<Stage>> for StageOrder {
    type Error = LemError;

    fn try_from(stages: Vec<Stage>) -> Result<Self> {
        Self::new(stages)
    }
}

impl From<StageOrder> for Vec<Stage> {
    fn from(order: StageOrder) -> Self {
        order.0
    }
}

/// When the sink-fill stage runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPolicy {
    #[default]
    EveryStep,
    /// First step only.
    Once,
    Never,
}

/// What the sink-fill stage writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillTarget {
    /// A filled copy used only for routing; elevation is left alone.
    #[default]
    RoutingSurface,
    /// Fill the elevation field in place.
    Elevation,
}

/// How storm intensity enters erosion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StormCoupling {
    /// Intensity only switches transport on or off.
    #[default]
    Gate,
    /// Erosion uses discharge `intensity * A`.
    ScaledDischarge,
}

/// Per-stage results of one step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepReport {
    pub stages_run: Vec<Stage>,
    pub fill_raised_nodes: usize,
    pub diffusion_substeps: usize,
    pub eroded_nodes: usize,
    pub max_erosion: f64,
    pub newton_fallbacks: usize,
    pub max_uplift: f64,
}

/// Mutable state shared by the stages of one step.
pub struct StepContext<'a> {
    pub grid: &'a mut RasterGrid,
    /// Filled copy of the elevation written by the fill stage.
    pub routing_surface: Option<Vec<f64>>,
    /// Flow graph routed during this step.
    pub flow: Option<FlowGraph>,
    pub fill_target: FillTarget,
    /// Rainfall multiplier on drainage area for erosion.
    pub rainfall: f64,
    /// Model time at the start of the step.
    pub time: f64,
    pub report: StepReport,
}

/// A process that advances the grid by `dt`.
pub trait Process {
    fn stage(&self) -> Stage;

    fn apply(&self, ctx: &mut StepContext<'_>, dt: f64) -> Result<()>;
}

impl Process for SinkFiller {
    fn stage(&self) -> Stage {
        Stage::SinkFill
    }

    fn apply(&self, ctx: &mut StepContext<'_>, _dt: f64) -> Result<()> {
        let report = match ctx.fill_target {
            FillTarget::Elevation => {
                ctx.routing_surface = None;
                self.fill(ctx.grid)?
            }
            FillTarget::RoutingSurface => {
                let (surface, report) = self.filled_surface(ctx.grid)?;
                ctx.routing_surface = Some(surface);
                report
            }
        };
        ctx.report.fill_raised_nodes = report.raised_nodes;
        Ok(())
    }
}

impl Process for FlowRouter {
    fn stage(&self) -> Stage {
        Stage::Route
    }

    fn apply(&self, ctx: &mut StepContext<'_>, _dt: f64) -> Result<()> {
        let graph = self.route_surface(ctx.grid, ctx.routing_surface.as_deref())?;
        ctx.flow = Some(graph);
        Ok(())
    }
}

impl Process for LinearDiffuser {
    fn stage(&self) -> Stage {
        Stage::Diffuse
    }

    fn apply(&self, ctx: &mut StepContext<'_>, dt: f64) -> Result<()> {
        let report = self.run_one_step(ctx.grid, dt)?;
        ctx.report.diffusion_substeps = report.substeps;
        Ok(())
    }
}

impl Process for StreamPowerEroder {
    fn stage(&self) -> Stage {
        Stage::Erode
    }

    fn apply(&self, ctx: &mut StepContext<'_>, dt: f64) -> Result<()> {
        let graph = ctx
            .flow
            .as_ref()
            .ok_or_else(|| LemError::configuration("no flow graph routed in this step"))?;
        let report = self.run_with_rainfall(ctx.grid, graph, dt, ctx.rainfall)?;
        ctx.report.eroded_nodes = report.eroded_nodes;
        ctx.report.max_erosion = report.max_erosion;
        ctx.report.newton_fallbacks = report.newton_fallbacks;
        Ok(())
    }
}

impl Process for UpliftForcing {
    fn stage(&self) -> Stage {
        Stage::Uplift
    }

    fn apply(&self, ctx: &mut StepContext<'_>, dt: f64) -> Result<()> {
        let report = self.run_one_step(ctx.grid, ctx.time, dt)?;
        ctx.report.max_uplift = report.max_uplift;
        Ok(())
    }
}
