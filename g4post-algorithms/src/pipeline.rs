//! Sequential execution of validated instructions over a variable store.

use crate::active_volume::{ActiveVolumeFilter, VolumeTest};
use crate::coincidence::{correlate, CoincidenceParams};
use crate::config::{Instruction, ModuleKind, ModuleParams};
use crate::geometry::GeometryRegistry;
use crate::group::Grouping;
use crate::r90::estimate;
use crate::reduce::{sum_energy, Threshold};
use crate::window::Windowing;
use g4post_core::{Error, Ragged, Result, VariableStore};

/// Executable form of one module.
#[derive(Clone, Debug)]
pub enum Stage {
    /// Temporal windowing.
    Window(Windowing),
    /// Sensitive-volume grouping.
    Group(Grouping),
    /// Active-volume filter.
    ActiveVolume(ActiveVolumeFilter),
    /// Cross-stream coincidence.
    Coincidence(CoincidenceParams),
    /// R90 estimator.
    R90,
    /// Elementwise threshold.
    Threshold(Threshold),
    /// Innermost-level sum.
    SumEnergy,
}

impl Stage {
    /// Builds the stage, loading geometry through `registry` when needed.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for invalid parameters or
    /// [`Error::Geometry`] if a geometry file cannot be loaded.
    pub fn build(params: &ModuleParams, registry: &GeometryRegistry) -> Result<Self> {
        Ok(match params {
            ModuleParams::Window(params) => Self::Window(Windowing::new(*params)),
            ModuleParams::GroupSensitiveVolume(params) => {
                Self::Group(Grouping::from_params(params)?)
            }
            ModuleParams::ActiveVolume(params) => Self::ActiveVolume(ActiveVolumeFilter::new(
                VolumeTest::from_params(params, registry)?,
            )),
            ModuleParams::CoincidenceWindow(params) => Self::Coincidence(*params),
            ModuleParams::R90Estimator => Self::R90,
            ModuleParams::Threshold(threshold) => Self::Threshold(*threshold),
            ModuleParams::SumEnergy => Self::SumEnergy,
        })
    }

    /// Runs the stage on resolved inputs.
    ///
    /// # Errors
    /// Propagates the module's error.
    pub fn run(&self, inputs: &[&Ragged], n_outputs: usize) -> Result<Vec<Ragged>> {
        match self {
            Self::Window(windowing) => {
                let out = windowing.run(inputs[0], inputs[1], &inputs[2..])?;
                let mut outputs = Vec::with_capacity(out.fields.len() + 2);
                outputs.push(out.boundaries);
                outputs.push(out.shifted);
                outputs.extend(out.fields);
                Ok(outputs)
            }
            Self::Group(grouping) => grouping.run(inputs),
            Self::ActiveVolume(filter) => filter.run(inputs, n_outputs),
            Self::Coincidence(params) => {
                Ok(vec![correlate(params, inputs[0], inputs[1], inputs[2])?])
            }
            Self::R90 => Ok(vec![estimate(inputs[0], inputs[1], inputs[2], inputs[3])?]),
            Self::Threshold(threshold) => Ok(vec![threshold.apply(inputs[0])]),
            Self::SumEnergy => Ok(vec![sum_energy(inputs[0])?]),
        }
    }
}

/// One named instance of a stage with its variable bindings.
#[derive(Clone, Debug)]
pub struct Step {
    name: String,
    kind: ModuleKind,
    input: Vec<String>,
    output: Vec<String>,
    stage: Stage,
}

impl Step {
    fn build(instruction: &Instruction, registry: &GeometryRegistry) -> Result<Self> {
        let kind = instruction.kind();
        kind.check_arity(instruction.input.len(), instruction.output.len())?;
        Ok(Self {
            name: instruction.name.clone(),
            kind,
            input: instruction.input.clone(),
            output: instruction.output.clone(),
            stage: Stage::build(&instruction.params, registry)?,
        })
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module kind.
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn execute(&self, store: &mut VariableStore) -> Result<()> {
        let outputs = {
            let inputs = store.gather(&self.input)?;
            self.stage.run(&inputs, self.output.len())?
        };
        if outputs.len() != self.output.len() {
            return Err(Error::ShapeMismatch(format!(
                "module produced {} outputs, {} declared",
                outputs.len(),
                self.output.len()
            )));
        }
        for (name, value) in self.output.iter().zip(outputs) {
            store.insert(name.clone(), value);
        }
        Ok(())
    }
}

/// Ordered list of steps run strictly in sequence.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    /// Builds every step of `instructions`.
    ///
    /// # Errors
    /// Fails on the first step that cannot be built, naming it.
    pub fn new(instructions: &[Instruction], registry: &GeometryRegistry) -> Result<Self> {
        let steps = instructions
            .iter()
            .map(|instruction| {
                Step::build(instruction, registry)
                    .map_err(|e| e.context(format_args!("step `{}`", instruction.name)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pipeline has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step, logging each instance name at debug level.
    ///
    /// # Errors
    /// Stops at the first failing step; see [`Pipeline::run_with`].
    pub fn run(&self, store: &mut VariableStore) -> Result<()> {
        self.run_with(store, |name| log::debug!("running {name}"))
    }

    /// Runs every step, reporting each instance name to `observer` first.
    ///
    /// # Errors
    /// Returns [`Error::MissingKey`] for an absent input, or the failing
    /// step's error prefixed with its name.
    pub fn run_with<F>(&self, store: &mut VariableStore, mut observer: F) -> Result<()>
    where
        F: FnMut(&str),
    {
        for step in &self.steps {
            observer(&step.name);
            step.execute(store)
                .map_err(|e| e.context(format_args!("step `{}`", step.name)))?;
        }
        Ok(())
    }
}
