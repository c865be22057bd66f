use crate::context::GpuContext;
use crate::error::SlaeError;
use crate::Real;
use std::fmt::Debug;
use std::{mem, sync::Arc};
use wgpu::PollType;

/// A wrapper around a `wgpu::Buffer` holding a device-resident vector of
/// `Real` scalars. Exclusively owned by its creating component; never aliased
/// across unrelated logical vectors.
#[derive(Debug)]
pub struct GpuVector {
    buffer: wgpu::Buffer,
    size: usize, // Number of elements of type Real
    size_bytes: u64,
    usage: wgpu::BufferUsages,
    label: String,
    pub(crate) context: Arc<GpuContext>,
}

impl GpuVector {
    /// Internal constructor used by GpuDevice.
    pub(crate) fn new_internal(
        buffer: wgpu::Buffer,
        size: usize,
        usage: wgpu::BufferUsages,
        label: String,
        context: Arc<GpuContext>,
    ) -> Self {
        let size_bytes = (size * mem::size_of::<Real>()) as u64;
        Self {
            buffer,
            size,
            size_bytes,
            usage,
            label,
            context,
        }
    }

    /// Returns the underlying `wgpu::Buffer`.
    pub(crate) fn inner(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Returns the number of elements the vector holds.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the size of the vector's buffer in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Returns the buffer's usage flags.
    pub fn usage(&self) -> wgpu::BufferUsages {
        self.usage
    }

    /// Returns the buffer's label.
    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    /// Returns a `BindingResource` for the entire buffer.
    pub fn as_entire_binding(&self) -> wgpu::BindingResource {
        self.buffer.as_entire_binding()
    }

    /// Reads the vector's contents back to the CPU.
    /// Note: This is an async operation and involves GPU-CPU synchronization.
    pub async fn read_contents(&self) -> Result<Vec<Real>, SlaeError> {
        self.context
            .read_buffer_to_cpu(self.inner(), self.size())
            .await
    }

    /// Writes data from a CPU slice into this GPU vector.
    pub async fn write_contents(&self, data: &[Real]) -> Result<(), SlaeError> {
        if data.len() != self.size {
            return Err(SlaeError::InvalidDimensions(format!(
                "Data length ({}) does not match GpuVector size ({})",
                data.len(),
                self.size
            )));
        }
        self.context.write_buffer(self.inner(), data).await
    }

    /// Copies the content of another GpuVector into this one on-device.
    /// Both vectors must have the same size and belong to the same context.
    pub fn clone_from(&mut self, source: &GpuVector) -> Result<(), SlaeError> {
        if self.size != source.size {
            return Err(SlaeError::InvalidDimensions(format!(
                "Vector sizes for clone_from mismatch: {} != {}",
                self.size, source.size
            )));
        }
        if self.size_bytes == 0 {
            return Ok(()); // Nothing to copy
        }

        if !self.usage.contains(wgpu::BufferUsages::COPY_DST) {
            return Err(SlaeError::UnsupportedOperation(
                "Destination vector buffer requires COPY_DST usage for clone_from".to_string(),
            ));
        }
        if !source.usage.contains(wgpu::BufferUsages::COPY_SRC) {
            return Err(SlaeError::UnsupportedOperation(
                "Source vector buffer requires COPY_SRC usage for clone_from".to_string(),
            ));
        }

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("GpuVector clone_from encoder"),
                });
        encoder.copy_buffer_to_buffer(source.inner(), 0, self.inner(), 0, self.size_bytes);
        self.context.queue.submit(Some(encoder.finish()));

        // Subsequent submissions are ordered after the copy by the queue;
        // polling keeps the host-side failure surface close to the call site.
        cfg_if::cfg_if! {
            if #[cfg(not(target_arch = "wasm32"))] {
                let _ = self.context.device.poll(PollType::Wait);
            }
        }
        Ok(())
    }
}
