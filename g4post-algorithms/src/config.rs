//! Pipeline instructions.
//!
//! An instruction names a module kind, the store variables it reads and
//! writes, and its parameters. Global parameters are merged into every
//! instruction; keys set on the instruction itself take precedence.

use crate::active_volume::{ActiveVolumeParams, ACTIVE_VOLUME_INPUTS};
use crate::coincidence::CoincidenceParams;
use crate::group::{GroupParams, VOLUME_SLOT};
use crate::reduce::Threshold;
use crate::window::WindowParams;
use g4post_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Parameter map as written in the configuration.
pub type ParamMap = Map<String, Value>;

/// One instruction as written in the configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionSpec {
    /// Instance name, used in progress reports and errors.
    pub name: String,
    /// Module kind.
    pub module: String,
    /// Variables read, in module order.
    #[serde(default)]
    pub input: Vec<String>,
    /// Variables written, in module order.
    #[serde(default)]
    pub output: Vec<String>,
    /// Instance parameters.
    #[serde(default)]
    pub para: ParamMap,
}

/// Closed set of module kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Temporal windowing.
    Window,
    /// Sensitive-volume grouping.
    GroupSensitiveVolume,
    /// Active-volume filter.
    ActiveVolume,
    /// Cross-stream coincidence.
    CoincidenceWindow,
    /// R90 estimator.
    R90Estimator,
    /// Elementwise threshold.
    Threshold,
    /// Innermost-level sum.
    SumEnergy,
}

impl ModuleKind {
    /// Every kind, in documentation order.
    pub const ALL: [Self; 7] = [
        Self::Window,
        Self::GroupSensitiveVolume,
        Self::ActiveVolume,
        Self::CoincidenceWindow,
        Self::R90Estimator,
        Self::Threshold,
        Self::SumEnergy,
    ];

    /// Resolves a configuration module name.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an unknown name.
    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| Error::Config(format!("unknown module `{name}`")))
    }

    /// Configuration name of the kind.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Window => "window",
            Self::GroupSensitiveVolume => "group_sensitive_volume",
            Self::ActiveVolume => "active_volume",
            Self::CoincidenceWindow => "coincidence_window",
            Self::R90Estimator => "r90_estimator",
            Self::Threshold => "threshold",
            Self::SumEnergy => "sum_energy",
        }
    }

    /// Checks the declared input and output counts.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the expected arity.
    pub fn check_arity(self, inputs: usize, outputs: usize) -> Result<()> {
        let ok = match self {
            Self::Window => inputs >= 2 && outputs == inputs,
            Self::GroupSensitiveVolume => inputs > VOLUME_SLOT && outputs == inputs,
            Self::ActiveVolume => {
                inputs == ACTIVE_VOLUME_INPUTS && (1..=ACTIVE_VOLUME_INPUTS + 1).contains(&outputs)
            }
            Self::CoincidenceWindow => inputs == 3 && outputs == 1,
            Self::R90Estimator => inputs == 4 && outputs == 1,
            Self::Threshold | Self::SumEnergy => inputs == 1 && outputs == 1,
        };
        if ok {
            return Ok(());
        }
        let expected = match self {
            Self::Window => "at least 2 inputs and as many outputs",
            Self::GroupSensitiveVolume => "at least 3 inputs and as many outputs",
            Self::ActiveVolume => "6 inputs and 1 to 7 outputs",
            Self::CoincidenceWindow => "3 inputs and 1 output",
            Self::R90Estimator => "4 inputs and 1 output",
            Self::Threshold | Self::SumEnergy => "1 input and 1 output",
        };
        Err(Error::Config(format!(
            "module `{}` takes {expected}, got {inputs} inputs and {outputs} outputs",
            self.name()
        )))
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed parameters of an instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum ModuleParams {
    /// Windowing parameters.
    Window(WindowParams),
    /// Grouping parameters.
    GroupSensitiveVolume(GroupParams),
    /// Active-volume parameters.
    ActiveVolume(ActiveVolumeParams),
    /// Coincidence interval.
    CoincidenceWindow(CoincidenceParams),
    /// R90 takes no parameters.
    R90Estimator,
    /// Threshold bounds.
    Threshold(Threshold),
    /// Summing takes no parameters.
    SumEnergy,
}

impl ModuleParams {
    /// Kind these parameters belong to.
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::Window(_) => ModuleKind::Window,
            Self::GroupSensitiveVolume(_) => ModuleKind::GroupSensitiveVolume,
            Self::ActiveVolume(_) => ModuleKind::ActiveVolume,
            Self::CoincidenceWindow(_) => ModuleKind::CoincidenceWindow,
            Self::R90Estimator => ModuleKind::R90Estimator,
            Self::Threshold(_) => ModuleKind::Threshold,
            Self::SumEnergy => ModuleKind::SumEnergy,
        }
    }

    fn parse(kind: ModuleKind, para: ParamMap) -> Result<Self> {
        Ok(match kind {
            ModuleKind::Window => {
                let params: WindowParams = typed(para)?;
                params.validate()?;
                Self::Window(params)
            }
            ModuleKind::GroupSensitiveVolume => Self::GroupSensitiveVolume(typed(para)?),
            ModuleKind::ActiveVolume => Self::ActiveVolume(typed(para)?),
            ModuleKind::CoincidenceWindow => Self::CoincidenceWindow(typed(para)?),
            ModuleKind::R90Estimator => Self::R90Estimator,
            ModuleKind::Threshold => {
                let threshold: Threshold = typed(para)?;
                threshold.validate()?;
                Self::Threshold(threshold)
            }
            ModuleKind::SumEnergy => Self::SumEnergy,
        })
    }
}

fn typed<T: DeserializeOwned>(para: ParamMap) -> Result<T> {
    serde_json::from_value(Value::Object(para)).map_err(|e| Error::Config(e.to_string()))
}

/// Merges global defaults with instance parameters; instance keys win.
#[must_use]
pub fn merge_params(global: &ParamMap, local: &ParamMap) -> ParamMap {
    let mut merged = global.clone();
    for (key, value) in local {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Validated instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// Instance name.
    pub name: String,
    /// Variables read.
    pub input: Vec<String>,
    /// Variables written.
    pub output: Vec<String>,
    /// Typed parameters.
    pub params: ModuleParams,
}

impl Instruction {
    /// Validates one instruction against its module kind.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an unknown module, a wrong number of
    /// inputs or outputs, or parameters that do not fit the module.
    pub fn from_spec(spec: &InstructionSpec, global: &ParamMap) -> Result<Self> {
        let resolve = || -> Result<Self> {
            let kind = ModuleKind::parse(&spec.module)?;
            kind.check_arity(spec.input.len(), spec.output.len())?;
            let params = ModuleParams::parse(kind, merge_params(global, &spec.para))?;
            Ok(Self {
                name: spec.name.clone(),
                input: spec.input.clone(),
                output: spec.output.clone(),
                params,
            })
        };
        resolve().map_err(|e| e.context(format_args!("instruction `{}`", spec.name)))
    }

    /// Module kind of the instruction.
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        self.params.kind()
    }
}

/// Validates an ordered instruction list.
///
/// # Errors
/// Fails on the first invalid instruction.
pub fn parse_instructions(specs: &[InstructionSpec], global: &ParamMap) -> Result<Vec<Instruction>> {
    specs
        .iter()
        .map(|spec| Instruction::from_spec(spec, global))
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use serde_json::json;

    fn spec(value: Value) -> InstructionSpec {
        serde_json::from_value(value).unwrap()
    }

    fn map(value: Value) -> ParamMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_instance_params_win_over_global() {
        let window = spec(json!({
            "name": "w", "module": "window",
            "input": ["t0", "t"], "output": ["b", "wt"],
            "para": {"dT": 500.0}
        }));
        let global = map(json!({"dT": 1e4, "threads": 4}));
        let instruction = Instruction::from_spec(&window, &global).unwrap();
        match instruction.params {
            ModuleParams::Window(params) => assert_eq!(params.dt, 500.0),
            other => panic!("unexpected params {other:?}"),
        }

        let merged = merge_params(&global, &map(json!({"dT": 1.0})));
        assert_eq!(merged["dT"], json!(1.0));
        assert_eq!(merged["threads"], json!(4));
    }

    #[test]
    fn test_global_default_applies_when_instance_silent() {
        let window = spec(json!({
            "name": "w", "module": "window",
            "input": ["t0", "t"], "output": ["b", "wt"]
        }));
        let instruction = Instruction::from_spec(&window, &map(json!({"dT": 250.0}))).unwrap();
        assert_eq!(
            instruction.params,
            ModuleParams::Window(WindowParams {
                dt: 250.0,
                t_max: None
            })
        );
    }

    #[test]
    fn test_unknown_module_fails_at_load() {
        let bogus = spec(json!({"name": "x", "module": "smear", "input": ["a"], "output": ["b"]}));
        let err = Instruction::from_spec(&bogus, &ParamMap::new()).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("smear") && msg.contains("`x`")));
    }

    #[test]
    fn test_arity_is_checked() {
        let r90 = spec(json!({"name": "r", "module": "r90_estimator", "input": ["e", "x", "y"], "output": ["r"]}));
        assert!(Instruction::from_spec(&r90, &ParamMap::new()).is_err());

        assert!(ModuleKind::ActiveVolume.check_arity(6, 7).is_ok());
        assert!(ModuleKind::ActiveVolume.check_arity(6, 8).is_err());
        assert!(ModuleKind::Window.check_arity(3, 3).is_ok());
        assert!(ModuleKind::Window.check_arity(3, 2).is_err());
    }

    #[test]
    fn test_bad_params_are_config_errors() {
        let threshold = spec(json!({"name": "thr", "module": "threshold", "input": ["e"], "output": ["m"], "para": {"thr": "low"}}));
        assert!(matches!(
            Instruction::from_spec(&threshold, &ParamMap::new()),
            Err(Error::Config(_))
        ));

        let coincidence = spec(json!({"name": "c", "module": "coincidence_window", "input": ["a", "b", "v"], "output": ["s"]}));
        assert!(Instruction::from_spec(&coincidence, &ParamMap::new()).is_err());
    }

    #[test]
    fn test_every_kind_round_trips_its_name() {
        for kind in ModuleKind::ALL {
            assert_eq!(ModuleKind::parse(kind.name()).unwrap(), kind);
        }
    }
}
