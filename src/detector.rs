use std::path::PathBuf;

use ndarray::{Array2, Array4, ArrayViewD, Axis, ErrorKind, Ix3, ShapeError};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{error::Result, CollageError, ExecutionProvider};

/// The object-detection collaborator.
///
/// Takes a `1×3×S×S` tensor and returns one row per cell laid out as
/// `(cx, cy, w, h, p_0, .., p_n)` in model pixel units.
pub trait Detector: Send {
    fn infer(&mut self, input: Array4<f32>) -> Result<Array2<f32>>;
}

impl<F> Detector for F
where
    F: FnMut(Array4<f32>) -> Result<Array2<f32>> + Send,
{
    fn infer(&mut self, input: Array4<f32>) -> Result<Array2<f32>> {
        self(input)
    }
}

/// YOLO-style region detector running on ONNX Runtime.
pub struct OrtDetector {
    session: Session,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf, input_size: u32) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    let shape = format!("images:1x3x{input_size}x{input_size}");
    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(&shape)
        .with_profile_max_shapes(&shape)
        .with_profile_opt_shapes(&shape)
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

impl OrtDetector {
    #[instrument(level = "debug")]
    pub fn init(
        path: PathBuf,
        num_threads: usize,
        input_size: u32,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> ort::Result<Self> {
        #[cfg(feature = "directml")]
        let parallel = !execution_providers.contains(&ExecutionProvider::DirectML);
        #[cfg(not(feature = "directml"))]
        let parallel = true;

        let execution_providers = execution_providers.iter().filter_map(
            |provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "tensorrt")]
                    ExecutionProvider::TensorRT => Some(setup_tensorrt(
                        cache_path.clone().unwrap_or_else(|| {
                            path.parent()
                                .map(|dir| dir.join(".cache"))
                                .unwrap_or_else(|| PathBuf::from(".cache"))
                        }),
                        input_size,
                    )),
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(setup_cuda()),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => Some(setup_directml()),
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => Some(setup_coreml()),
                }
            },
        );
        #[cfg(not(feature = "tensorrt"))]
        let _ = (&cache_path, input_size);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_memory_pattern(parallel)?
            .with_parallel_execution(parallel)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(path)?;

        log::debug!("Detector session inputs: {:?}", session.inputs);
        log::debug!("Detector session outputs: {:?}", session.outputs);

        Ok(Self { session })
    }
}

impl Detector for OrtDetector {
    #[instrument(level = "debug", skip(self, input))]
    fn infer(&mut self, input: Array4<f32>) -> Result<Array2<f32>> {
        let input_name = self
            .session
            .inputs
            .first()
            .ok_or_else(|| CollageError::Config("detector model has no inputs".into()))?
            .name
            .clone();
        let output_name = self
            .session
            .outputs
            .first()
            .ok_or_else(|| CollageError::Config("detector model has no outputs".into()))?
            .name
            .clone();

        let outputs = self.session.run(inputs![input_name.as_str() => input]?)?;
        let output = outputs.get(output_name.as_str()).ok_or_else(|| {
            CollageError::Config(format!("detector output `{output_name}` missing"))
        })?;
        let predictions = predictions_from_output(output.try_extract_tensor::<f32>()?)?;
        log::trace!("Detector produced {} cells", predictions.len_of(Axis(0)));
        Ok(predictions)
    }
}

/// Turns a `(1, 4 + classes, cells)` head into `(cells, 4 + classes)` rows.
pub(crate) fn predictions_from_output(output: ArrayViewD<f32>) -> Result<Array2<f32>> {
    let output = output.into_dimensionality::<Ix3>()?;
    if output.len_of(Axis(0)) == 0 {
        return Err(ShapeError::from_kind(ErrorKind::OutOfBounds).into());
    }
    Ok(output
        .index_axis(Axis(0), 0)
        .reversed_axes()
        .as_standard_layout()
        .into_owned())
}
