//! Bounding-box crops of HWC images

use ml_feed_core::{ArrayData, ArrayValue, NodeInputs, Record, Result, SampleError, TransformNode};

/// Crops an HWC image to a `[x0, y0, x1, y1]` box.
///
/// Coordinates are clamped to the image like slice bounds; a box that is
/// empty after clamping fails the sample.
#[derive(Debug, Clone)]
pub struct BoxCrop {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl BoxCrop {
    /// Crop `image` by `crop` into `output`
    pub fn new(image: impl Into<String>, crop: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            inputs: vec![image.into(), crop.into()],
            outputs: vec![output.into()],
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp(coordinate: f32, limit: usize) -> usize {
    if coordinate.is_nan() || coordinate <= 0.0 {
        0
    } else {
        (coordinate as usize).min(limit)
    }
}

fn crop(image: &ArrayValue, bounds: &[f32]) -> std::result::Result<ArrayValue, SampleError> {
    let &[height, width, channels] = image.shape() else {
        return Err(SampleError::InvalidValue(format!(
            "expected an HWC image, got shape {:?}",
            image.shape()
        )));
    };
    let &[x0, y0, x1, y1] = bounds else {
        return Err(SampleError::InvalidValue(format!(
            "crop box needs 4 coordinates, got {}",
            bounds.len()
        )));
    };

    let (x0, x1) = (clamp(x0, width), clamp(x1, width));
    let (y0, y1) = (clamp(y0, height), clamp(y1, height));
    if x1 <= x0 || y1 <= y0 {
        return Err(SampleError::InvalidValue(format!(
            "crop box {bounds:?} is empty on a {height}x{width} image"
        )));
    }

    let pixel = channels * image.dtype().size_bytes();
    let bytes = image.as_bytes();
    let mut out = Vec::with_capacity((y1 - y0) * (x1 - x0) * pixel);
    for y in y0..y1 {
        let row = y * width * pixel;
        out.extend_from_slice(&bytes[row + x0 * pixel..row + x1 * pixel]);
    }

    let data = ArrayData::from_bytes(image.dtype(), &out).map_err(|e| SampleError::Decode(e.to_string()))?;
    ArrayValue::new([y1 - y0, x1 - x0, channels], data).map_err(|e| SampleError::InvalidValue(e.to_string()))
}

impl TransformNode for BoxCrop {
    fn consumes(&self) -> &[String] {
        &self.inputs
    }

    fn produces(&self) -> &[String] {
        &self.outputs
    }

    fn run(&self, inputs: &NodeInputs<'_>) -> Result<Record> {
        let image = inputs.array(&self.inputs[0])?;
        let bounds = inputs.array(&self.inputs[1])?.data().to_f32();
        let mut out = Record::new();
        out.insert(self.outputs[0].clone(), crop(image, &bounds)?.into());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_feed_core::Value;
    use test_case::test_case;

    fn image() -> ArrayValue {
        // 3 rows, 4 columns, 2 channels; value = 10 * row + column
        let data = (0..3u8)
            .flat_map(|y| (0..4u8).flat_map(move |x| [10 * y + x; 2]))
            .collect();
        ArrayValue::new([3, 4, 2], ArrayData::UInt8(data)).unwrap()
    }

    fn run(bounds: Vec<f32>) -> Result<Record> {
        let node = BoxCrop::new("image", "crop", "patch");
        let mut state = Record::new();
        state.insert("image".into(), image().into());
        state.insert("crop".into(), Value::Array(ArrayValue::from_f32([4], bounds).unwrap()));
        node.run(&NodeInputs::new("crop", &state, node.consumes()))
    }

    #[test]
    fn test_crops_rows_and_columns() {
        let out = run(vec![1.0, 1.0, 3.0, 3.0]).unwrap();
        let patch = out["patch"].as_array().unwrap();
        assert_eq!(patch.shape(), &[2, 2, 2]);
        assert_eq!(patch.data(), &ArrayData::UInt8(vec![11, 11, 12, 12, 21, 21, 22, 22]));
    }

    #[test]
    fn test_box_is_clamped_to_image() {
        let out = run(vec![-5.0, 2.0, 100.0, 100.0]).unwrap();
        assert_eq!(out["patch"].as_array().unwrap().shape(), &[1, 4, 2]);
    }

    #[test_case(vec![2.0, 0.0, 2.0, 3.0] ; "zero width")]
    #[test_case(vec![0.0, 3.0, 4.0, 5.0] ; "below image")]
    fn test_empty_box_fails_the_sample(bounds: Vec<f32>) {
        assert!(run(bounds).unwrap_err().is_per_sample());
    }
}
