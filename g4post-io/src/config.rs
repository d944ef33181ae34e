//! Run configuration document.
//!
//! ```json
//! {
//!   "io": {"input": {"folder": "sim/", "format": "jsonl"}, "output": "out/"},
//!   "input": {"tree_or_base_name": "hit", "var": {"t": "hit/t", "edep": "hit/edep"}},
//!   "output": ["energy"],
//!   "para": {"threads": 4, "step_size": 1000, "mode": ""},
//!   "instr": [{"name": "w", "module": "window", "input": [..], "output": [..]}]
//! }
//! ```

use crate::{Error, Result};
use g4post_algorithms::{parse_instructions, Instruction, InstructionSpec, ParamMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Format of the input files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// One JSON object per event line, read in chunks.
    Jsonl,
    /// Container written by a previous run, read whole.
    Hdf5,
}

impl InputFormat {
    /// File extension of the format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jsonl => "jsonl",
            Self::Hdf5 => "hdf5",
        }
    }
}

/// Input folder and format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputLocation {
    /// Folder scanned for input files.
    pub folder: PathBuf,
    /// Format of the files to process.
    pub format: InputFormat,
}

/// File locations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IoConfig {
    /// Input discovery.
    pub input: InputLocation,
    /// Output folder, or output file in summarize mode.
    pub output: PathBuf,
}

/// Mapping of input fields to store variables.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Tree or group the fields live under.
    #[serde(
        rename = "tree_or_base_name",
        alias = "tree",
        alias = "base_name",
        default
    )]
    pub base_name: String,
    /// Store variable name to source field path.
    #[serde(default)]
    pub var: BTreeMap<String, String>,
}

impl InputConfig {
    /// `(variable, field)` pairs; the field is the last `/` component of the
    /// source path.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.var
            .iter()
            .map(|(name, path)| (name.as_str(), path.rsplit('/').next().unwrap_or(path)))
    }
}

/// Whether results stay per file or are merged into one output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// One output file per input file.
    #[default]
    #[serde(rename = "")]
    PerFile,
    /// Concatenate all per-file outputs into one file.
    #[serde(rename = "summarize")]
    Summarize,
}

const fn default_threads() -> usize {
    1
}

/// Run-level parameters read from the global `para` map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    /// Worker count; one or less runs sequentially.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Events per chunk for streaming inputs; 0 reads whole files.
    #[serde(default)]
    pub step_size: usize,
    /// Output mode.
    #[serde(default)]
    pub mode: RunMode,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            step_size: 0,
            mode: RunMode::PerFile,
        }
    }
}

/// Complete run configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// File locations.
    pub io: IoConfig,
    /// Input field bindings.
    #[serde(default)]
    pub input: InputConfig,
    /// Variables written to the output container, in order.
    #[serde(default)]
    pub output: Vec<String>,
    /// Global parameters, merged into every instruction.
    #[serde(default)]
    pub para: ParamMap,
    /// Ordered instructions.
    #[serde(default)]
    pub instr: Vec<InstructionSpec>,
}

impl RunConfig {
    /// Parses a configuration document.
    ///
    /// # Errors
    /// Returns an error if the JSON does not describe a configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Run-level parameters.
    ///
    /// # Errors
    /// Returns [`Error::CoreError`] with a configuration error if `threads`,
    /// `step_size` or `mode` have the wrong type.
    pub fn run_params(&self) -> Result<RunParams> {
        let mut known = ParamMap::new();
        for key in ["threads", "step_size", "mode"] {
            if let Some(value) = self.para.get(key) {
                known.insert(key.to_string(), value.clone());
            }
        }
        serde_json::from_value(serde_json::Value::Object(known)).map_err(|e| {
            Error::CoreError(g4post_core::Error::Config(format!("para: {e}")))
        })
    }

    /// Validated instructions with global parameters merged in.
    ///
    /// # Errors
    /// Returns [`Error::CoreError`] for the first invalid instruction.
    pub fn instructions(&self) -> Result<Vec<Instruction>> {
        Ok(parse_instructions(&self.instr, &self.para)?)
    }

    /// Checks everything that can be checked before any file is touched.
    ///
    /// # Errors
    /// Returns a configuration error for invalid run parameters, invalid
    /// instructions, an instruction input that is neither bound nor produced
    /// by an earlier instruction, or a declared output that is duplicated or
    /// never produced.
    pub fn validate(&self) -> Result<Vec<Instruction>> {
        self.run_params()?;
        let instructions = self.instructions()?;

        let mut known: HashSet<&str> = self.input.var.keys().map(String::as_str).collect();
        for instruction in &instructions {
            if let Some(name) = instruction.input.iter().find(|n| !known.contains(n.as_str())) {
                return Err(config_error(format!(
                    "instruction `{}`: input `{name}` is neither bound nor produced by an earlier instruction",
                    instruction.name
                )));
            }
            known.extend(instruction.output.iter().map(String::as_str));
        }

        let mut declared = HashSet::new();
        for name in &self.output {
            if !declared.insert(name.as_str()) {
                return Err(config_error(format!("output `{name}` is declared twice")));
            }
            if !known.contains(name.as_str()) {
                return Err(config_error(format!(
                    "output `{name}` is neither an input nor produced by an instruction"
                )));
            }
        }
        Ok(instructions)
    }
}

fn config_error(message: String) -> Error {
    Error::CoreError(g4post_core::Error::Config(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "io": {"input": {"folder": "sim", "format": "jsonl"}, "output": "out"},
        "input": {"tree": "hit", "var": {"t": "hit/t", "edep": "edep"}},
        "output": ["energy"],
        "para": {"threads": 4, "step_size": 100, "mode": "summarize", "dT": 1000.0},
        "instr": [
            {"name": "w", "module": "window", "input": ["t", "t", "edep"], "output": ["b", "wt", "we"]},
            {"name": "s", "module": "sum_energy", "input": ["we"], "output": ["energy"]}
        ]
    }"#;

    #[test]
    fn test_parse_config_with_aliases() {
        let config = RunConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.io.input.format, InputFormat::Jsonl);
        assert_eq!(config.input.base_name, "hit");
        let bindings: Vec<_> = config.input.bindings().collect();
        assert_eq!(bindings, [("edep", "edep"), ("t", "t")]);

        let params = config.run_params().unwrap();
        assert_eq!(
            params,
            RunParams {
                threads: 4,
                step_size: 100,
                mode: RunMode::Summarize
            }
        );
        assert_eq!(config.validate().unwrap().len(), 2);
    }

    #[test]
    fn test_defaults_and_base_name_alias() {
        let config = RunConfig::from_json(
            r#"{"io": {"input": {"folder": "f", "format": "hdf5"}, "output": "o"},
                "input": {"base_name": "awkward", "var": {}}}"#,
        )
        .unwrap();
        assert_eq!(config.input.base_name, "awkward");
        assert_eq!(config.run_params().unwrap(), RunParams::default());
        assert!(config.instr.is_empty());
    }

    #[test]
    fn test_unproduced_output_is_rejected() {
        let mut config = RunConfig::from_json(CONFIG).unwrap();
        config.output.push("r90".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::CoreError(g4post_core::Error::Config(_))));

        config.para.insert("threads".into(), serde_json::json!("many"));
        assert!(config.run_params().is_err());
    }

    #[test]
    fn test_misspelled_instruction_input_is_rejected() {
        let mut config = RunConfig::from_json(CONFIG).unwrap();
        config.instr[1].input = vec!["we_typo".to_string()];
        let err = config.validate().unwrap_err();
        assert!(!err.is_missing_key());
        assert!(matches!(
            err,
            Error::CoreError(g4post_core::Error::Config(ref msg)) if msg.contains("`we_typo`")
        ));
    }

    #[test]
    fn test_input_produced_by_later_instruction_is_rejected() {
        let mut config = RunConfig::from_json(CONFIG).unwrap();
        config.instr.swap(0, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_output_is_rejected() {
        let mut config = RunConfig::from_json(CONFIG).unwrap();
        config.output.push("energy".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }
}
