//! Per-file processing: read chunks, run the pipeline, collect outputs.

use crate::config::RunConfig;
use crate::form::Columns;
use crate::source::InputSource;
use crate::Result;
use g4post_algorithms::Pipeline;
use g4post_core::{Ragged, VariableStore};
use std::path::Path;

/// Runs one pipeline over the records of one input file.
pub struct DataManager<'a> {
    config: &'a RunConfig,
    pipeline: &'a Pipeline,
    step_size: usize,
}

impl<'a> DataManager<'a> {
    /// Creates a manager using the chunking of `step_size`.
    #[must_use]
    pub fn new(config: &'a RunConfig, pipeline: &'a Pipeline, step_size: usize) -> Self {
        Self {
            config,
            pipeline,
            step_size,
        }
    }

    /// Source fields needed by the configured bindings.
    fn source_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .config
            .input
            .bindings()
            .map(|(_, field)| field.to_string())
            .collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }

    /// Processes `input` and returns the declared outputs of every record,
    /// in record order.
    ///
    /// # Errors
    /// Returns a missing-key error if a bound field or a declared output is
    /// absent, or the first read or pipeline error.
    pub fn process(&self, input: &Path) -> Result<Columns> {
        let source = InputSource::open(
            input,
            self.config.io.input.format,
            &self.config.input.base_name,
            self.source_fields(),
            self.step_size,
        )?;

        let mut collected = Columns::new(0);
        for name in &self.config.output {
            collected.push(name.clone(), Ragged::default())?;
        }
        let mut chunks = 0usize;
        for chunk in source {
            let chunk = chunk?;
            let mut store = VariableStore::new();
            for (name, field) in self.config.input.bindings() {
                let column = chunk
                    .get(field)
                    .ok_or_else(|| g4post_core::Error::MissingKey(field.to_string()))?;
                store.insert(name, column.clone());
            }

            self.pipeline.run_with(&mut store, |step| {
                log::trace!("{}: chunk {chunks}, step `{step}`", input.display());
            })?;

            let mut outputs = Columns::new(chunk.len());
            for name in &self.config.output {
                outputs.push(name.clone(), store.take(name)?)?;
            }
            collected.extend(&outputs)?;
            chunks += 1;
        }
        log::debug!(
            "{}: {} records in {chunks} chunks",
            input.display(),
            collected.len()
        );
        Ok(collected)
    }

    /// Processes `input` and writes the container to `output`, returning the
    /// record count. Nothing is written at `output` unless processing
    /// succeeds.
    ///
    /// # Errors
    /// Returns the processing error, or an error if the container cannot be
    /// written.
    #[cfg(feature = "hdf5")]
    pub fn process_file(&self, input: &Path, output: &Path) -> Result<usize> {
        let columns = self.process(input)?;
        crate::hdf5::write_container_atomic(
            output,
            &columns,
            &crate::hdf5::ContainerWriteOptions::default(),
        )?;
        Ok(columns.len())
    }
}
