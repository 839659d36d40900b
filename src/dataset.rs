use crate::error::{Error, Result};
use std::path::Path;
use tch::{Device, Kind, Tensor};
use tracing::debug;

/// Anything that can hand out batches of real images.
pub trait BatchSource {
    fn next_batch(&mut self) -> Tensor;
    /// Full batches per pass; leftovers smaller than one batch are dropped.
    fn batches_per_epoch(&self) -> usize;
}

/// In-memory image set, `[n, 3, size, size]` 8-bit pixels on the host.
///
/// Batches are converted to floats in [0, 1] only when served.
#[derive(Debug)]
pub struct ImageDataset {
    images: Tensor,
}

impl ImageDataset {
    /// Loads and resizes every image found in `dir`.
    pub fn load_dir(dir: impl AsRef<Path>, size: i64) -> Result<Self> {
        let images = tch::vision::image::load_dir(dir, size, size)?;
        Ok(Self::from_tensor(images))
    }

    pub fn from_tensor(images: Tensor) -> Self {
        Self {
            images: images.to_kind(Kind::Uint8),
        }
    }

    pub fn len(&self) -> i64 {
        self.images.size()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn images(&self) -> &Tensor {
        &self.images
    }
}

/// Endless shuffled iterator over an [`ImageDataset`].
///
/// Each pass walks a fresh permutation; a pass ends as soon as fewer than
/// `batch_size` indices remain.
#[derive(Debug)]
pub struct BatchIter {
    dataset: ImageDataset,
    batch_size: i64,
    device: Device,
    order: Tensor,
    cursor: i64,
}

impl BatchIter {
    pub fn new(dataset: ImageDataset, batch_size: i64, device: Device) -> Result<Self> {
        let len = dataset.len();
        if batch_size <= 0 {
            return Err(Error::InvalidBatchSize(batch_size));
        }
        if len < batch_size {
            return Err(Error::DatasetTooSmall { len, batch_size });
        }
        Ok(Self {
            order: Tensor::randperm(len, (Kind::Int64, Device::Cpu)),
            dataset,
            batch_size,
            device,
            cursor: 0,
        })
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    pub fn dataset(&self) -> &ImageDataset {
        &self.dataset
    }

    fn reshuffle(&mut self) {
        debug!("reshuffling {} images", self.dataset.len());
        self.order = Tensor::randperm(self.dataset.len(), (Kind::Int64, Device::Cpu));
        self.cursor = 0;
    }
}

impl BatchSource for BatchIter {
    fn next_batch(&mut self) -> Tensor {
        if self.cursor + self.batch_size > self.dataset.len() {
            self.reshuffle();
        }
        let index = self.order.narrow(0, self.cursor, self.batch_size);
        self.cursor += self.batch_size;
        self.dataset
            .images
            .index_select(0, &index)
            .to_device(self.device)
            .to_kind(Kind::Float)
            / 255.
    }

    fn batches_per_epoch(&self) -> usize {
        (self.dataset.len() / self.batch_size) as usize
    }
}
