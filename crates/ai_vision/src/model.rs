//! Species classifier runtime
//!
//! Binds a [`SpeciesNet`] to a burn backend: `NdArray` on the CPU, `Wgpu`
//! when built with the `accelerator` feature and an adapter is present.

use std::sync::Mutex;

use burn::{
    backend::{NdArray, ndarray::NdArrayDevice},
    tensor::{Tensor, TensorData, backend::Backend},
};
use domain::value_objects::{CHANNELS, ComputeDevice, Embedding, ImageTensor};
use tracing::{info, warn};

use crate::{checkpoint::Checkpoint, error::VisionError, network::SpeciesNet};

/// CPU backend
pub type CpuBackend = NdArray<f32>;

/// GPU backend
#[cfg(feature = "accelerator")]
pub type AcceleratorBackend = burn::backend::Wgpu;

/// Network weights resident on one backend
#[derive(Debug)]
struct Replica<B: Backend> {
    network: Mutex<SpeciesNet<B>>,
    device: B::Device,
}

impl<B: Backend> Replica<B> {
    fn load(checkpoint: &Checkpoint, device: B::Device) -> Result<Self, VisionError> {
        let network = checkpoint.load_network::<B>(&device)?;
        Ok(Self {
            network: Mutex::new(network),
            device,
        })
    }

    /// Parameters are reference counted, so the clone is cheap and the
    /// lock is only held while taking it
    fn network(&self) -> Result<SpeciesNet<B>, VisionError> {
        self.network
            .lock()
            .map(|network| network.clone())
            .map_err(|_| VisionError::Runtime("network lock poisoned".to_string()))
    }

    fn input(&self, image: &ImageTensor) -> Tensor<B, 4> {
        let data = TensorData::new(
            image.data().to_vec(),
            [1, CHANNELS, image.height(), image.width()],
        );
        Tensor::from_data(data, &self.device)
    }

    fn infer(&self, image: &ImageTensor) -> Result<(Vec<f32>, Vec<f32>), VisionError> {
        let (logits, embedding) = self.network()?.forward(self.input(image));
        Ok((to_vec(logits)?, to_vec(embedding)?))
    }

    fn embed(&self, image: &ImageTensor) -> Result<Vec<f32>, VisionError> {
        to_vec(self.network()?.embed(self.input(image)))
    }
}

fn to_vec<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<f32>, VisionError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| VisionError::Runtime(format!("{e:?}")))
}

#[derive(Debug)]
enum Runtime {
    Cpu(Replica<CpuBackend>),
    #[cfg(feature = "accelerator")]
    Accelerator(Replica<AcceleratorBackend>),
}

/// A loaded classifier bound to a compute device
#[derive(Debug)]
pub struct SpeciesClassifier {
    runtime: Runtime,
    input_size: usize,
    embedding_size: usize,
    num_classes: usize,
    device: ComputeDevice,
}

impl SpeciesClassifier {
    /// Read the checkpoint's weights onto the requested device
    pub fn from_checkpoint(
        checkpoint: &Checkpoint,
        device: ComputeDevice,
    ) -> Result<Self, VisionError> {
        checkpoint.validate()?;

        let (runtime, device) = match device {
            #[cfg(feature = "accelerator")]
            ComputeDevice::Accelerator { name } => (
                Runtime::Accelerator(Replica::load(checkpoint, Default::default())?),
                ComputeDevice::Accelerator { name },
            ),
            #[cfg(not(feature = "accelerator"))]
            ComputeDevice::Accelerator { name } => {
                warn!(accelerator = %name, "Built without accelerator support, loading on CPU");
                let cpu = ComputeDevice::Cpu {
                    threads: crate::device::cpu_threads(),
                };
                (Runtime::Cpu(Replica::load(checkpoint, NdArrayDevice::Cpu)?), cpu)
            },
            cpu @ ComputeDevice::Cpu { .. } => {
                (Runtime::Cpu(Replica::load(checkpoint, NdArrayDevice::Cpu)?), cpu)
            },
        };

        info!(
            device = %device,
            classes = checkpoint.num_classes,
            embedding_size = checkpoint.embedding_size,
            "Species network loaded"
        );

        Ok(Self {
            runtime,
            input_size: checkpoint.architecture.input_size,
            embedding_size: checkpoint.embedding_size,
            num_classes: checkpoint.num_classes,
            device,
        })
    }

    /// Embedding length
    pub const fn embedding_size(&self) -> usize {
        self.embedding_size
    }

    /// Number of logits
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Expected input side length
    pub const fn input_size(&self) -> usize {
        self.input_size
    }

    /// Device the model was loaded on
    pub const fn device(&self) -> &ComputeDevice {
        &self.device
    }

    /// Backbone only
    pub fn embed(&self, image: &ImageTensor) -> Result<Embedding, VisionError> {
        self.check_input(image)?;
        let embedding = match &self.runtime {
            Runtime::Cpu(replica) => replica.embed(image)?,
            #[cfg(feature = "accelerator")]
            Runtime::Accelerator(replica) => replica.embed(image)?,
        };
        ensure_finite(&embedding, "embedding")?;
        Ok(Embedding::new(embedding))
    }

    /// Backbone and head
    pub fn infer(&self, image: &ImageTensor) -> Result<(Vec<f32>, Embedding), VisionError> {
        self.check_input(image)?;
        let (logits, embedding) = match &self.runtime {
            Runtime::Cpu(replica) => replica.infer(image)?,
            #[cfg(feature = "accelerator")]
            Runtime::Accelerator(replica) => replica.infer(image)?,
        };
        ensure_finite(&embedding, "embedding")?;
        ensure_finite(&logits, "logits")?;
        Ok((logits, Embedding::new(embedding)))
    }

    fn check_input(&self, image: &ImageTensor) -> Result<(), VisionError> {
        let size = self.input_size;
        if image.height() != size || image.width() != size {
            return Err(VisionError::shape(
                format!("{CHANNELS}x{size}x{size}"),
                format!("{CHANNELS}x{}x{}", image.height(), image.width()),
            ));
        }
        Ok(())
    }
}

fn ensure_finite(values: &[f32], what: &'static str) -> Result<(), VisionError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(VisionError::NonFinite(what))
    }
}
