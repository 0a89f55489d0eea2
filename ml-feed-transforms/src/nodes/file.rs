//! Loading arrays from memory-mapped files

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use ml_feed_core::{ArrayValue, FieldTemplate, NodeInputs, Record, Result, SampleError, TransformNode};

/// Loads an array from the file named by a text input.
///
/// Files hold one bincode-encoded [`ArrayValue`] (see [`write_array_file`])
/// and are read through a memory map. Missing or undecodable files fail the
/// sample, as does an array that does not match the expected template.
#[derive(Debug, Clone)]
pub struct ArrayFileLoader {
    inputs: Vec<String>,
    outputs: Vec<String>,
    template: Option<FieldTemplate>,
}

impl ArrayFileLoader {
    /// Read the path in `path_field` into `output`
    pub fn new(path_field: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            inputs: vec![path_field.into()],
            outputs: vec![output.into()],
            template: None,
        }
    }

    /// Require every loaded array to match `template`
    pub fn with_template(mut self, template: FieldTemplate) -> Self {
        self.template = Some(template);
        self
    }
}

#[allow(unsafe_code)]
fn map_file(path: &Path) -> std::result::Result<Mmap, SampleError> {
    let file = File::open(path)?;
    // SAFETY: the map is read-only and dropped before this sample is done
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    Ok(mmap)
}

impl TransformNode for ArrayFileLoader {
    fn consumes(&self) -> &[String] {
        &self.inputs
    }

    fn produces(&self) -> &[String] {
        &self.outputs
    }

    fn templates(&self) -> Vec<(String, FieldTemplate)> {
        self.template
            .iter()
            .map(|template| (self.outputs[0].clone(), template.clone()))
            .collect()
    }

    fn run(&self, inputs: &NodeInputs<'_>) -> Result<Record> {
        let path = inputs.text(&self.inputs[0])?;
        let mmap = map_file(Path::new(path))?;
        let array: ArrayValue = bincode::deserialize(&mmap)
            .map_err(|e| SampleError::Decode(format!("{path}: {e}")))?;

        if let Some(template) = &self.template {
            if !array.matches(template) {
                return Err(SampleError::InvalidValue(format!(
                    "{path} holds {}, expected {template}",
                    array.template()
                ))
                .into());
            }
        }

        let mut out = Record::new();
        out.insert(self.outputs[0].clone(), array.into());
        Ok(out)
    }
}

/// Write `array` in the format [`ArrayFileLoader`] reads
pub fn write_array_file(path: impl AsRef<Path>, array: &ArrayValue) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, array)?;
    writer.flush()?;
    Ok(())
}
