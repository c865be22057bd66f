use crate::error::SlaeError;
use crate::kernel::Kernel;
use bytemuck::{Pod, Zeroable};
use cfg_if::cfg_if;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use wgpu::{util::DeviceExt, PollType}; // For create_buffer_init

/// Wrapper for the WGPU device and queue, including transfer counters and the
/// per-context compute-kernel cache. Kernel compilation is expensive, so each
/// shader is compiled at most once per context and reused across dispatches;
/// independent contexts never share state, so independent solves can run
/// concurrently without a process-wide singleton.
#[derive(Debug)]
pub(crate) struct GpuContext {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    /// Tracks bytes transferred from CPU to GPU via instrumented methods.
    pub(crate) bytes_to_gpu: Arc<AtomicU64>,
    /// Tracks bytes transferred from GPU to CPU via instrumented methods.
    pub(crate) bytes_from_gpu: Arc<AtomicU64>,
    /// Lazily-built compute pipelines keyed by kernel label.
    kernels: Mutex<HashMap<&'static str, Arc<Kernel>>>,
}

/// Rewrites the precision alias at the top of each shader when the crate is
/// built for double precision. WGSL has no preprocessor, so this plays the
/// role of the usual `USE_DOUBLE` compile switch.
fn prepare_source(source: &'static str) -> Cow<'static, str> {
    cfg_if! {
        if #[cfg(feature = "f64")] {
            Cow::Owned(source.replace("alias real = f32;", "alias real = f64;"))
        } else {
            Cow::Borrowed(source)
        }
    }
}

impl GpuContext {
    /// Initializes the WGPU context asynchronously.
    pub(crate) async fn new() -> Result<Self, SlaeError> {
        log::info!("Initializing native WGPU context");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY, // Vulkan, Metal, DX12
            ..Default::default()
        });

        log::debug!("Requesting native adapter");
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None, // No surface needed for compute
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| SlaeError::WgpuInitError("No suitable adapter found".to_string()))?;

        log::info!("Selected Adapter: {:?}", adapter.get_info());
        log::debug!("Adapter Features: {:?}", adapter.features());

        let mut limits = wgpu::Limits::default().using_resolution(adapter.limits());
        // The banded-matrix multiply binds nine band buffers plus the in/out
        // vectors in a single compute stage.
        limits.max_storage_buffers_per_shader_stage =
            limits.max_storage_buffers_per_shader_stage.max(12);
        log::debug!("Adjusted limits: {:?}", limits);

        cfg_if! {
            if #[cfg(feature = "f64")] {
                let required_features = wgpu::Features::SHADER_F64;
            } else {
                let required_features = wgpu::Features::empty();
            }
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("slae_core device"),
                trace: wgpu::Trace::Off,
                memory_hints: wgpu::MemoryHints::Performance,
                required_features,
                required_limits: limits,
            })
            .await
            .map_err(|e| SlaeError::WgpuInitError(format!("Failed to request device: {}", e)))?;

        log::info!("Device and queue obtained successfully");
        log::debug!("Device Features: {:?}", device.features());

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            bytes_to_gpu: Arc::new(AtomicU64::new(0)),
            bytes_from_gpu: Arc::new(AtomicU64::new(0)),
            kernels: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the cached kernel for `label`, compiling it on first use.
    pub(crate) fn kernel(
        &self,
        label: &'static str,
        source: &'static str,
        entry_point: &'static str,
    ) -> Arc<Kernel> {
        let mut cache = self
            .kernels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(cache.entry(label).or_insert_with(|| {
            log::debug!("Compiling compute kernel '{}'", label);
            Arc::new(Kernel::new(
                &self.device,
                label,
                &prepare_source(source),
                entry_point,
            ))
        }))
    }

    /// Helper to create a GPU buffer with initial data and track the transfer size.
    pub(crate) fn create_gpu_buffer_with_data(
        &self,
        label: &str,
        contents: &[u8], // Takes raw bytes
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        let byte_len = contents.len() as u64;
        log::trace!("Creating GPU buffer '{}' with {} bytes", label, byte_len);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });
        self.bytes_to_gpu.fetch_add(byte_len, Ordering::Relaxed);
        buffer
    }

    /// Helper function to write data from CPU slice `data` to an existing GPU `buffer`.
    /// Tracks the transfer size.
    pub(crate) async fn write_buffer<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        data: &[T],
    ) -> Result<(), SlaeError> {
        let byte_len = (data.len() * std::mem::size_of::<T>()) as u64;
        if byte_len == 0 {
            log::debug!("Skipping write for 0 bytes");
            return Ok(());
        }
        if buffer.size() < byte_len {
            return Err(SlaeError::Internal(format!(
                "Target buffer size ({}) is smaller than data size ({})",
                buffer.size(),
                byte_len
            )));
        }
        if !buffer.usage().contains(wgpu::BufferUsages::COPY_DST) {
            return Err(SlaeError::Internal(
                "Target buffer must have COPY_DST usage".to_string(),
            ));
        }

        log::trace!("Writing {} bytes to buffer", byte_len);
        self.queue
            .write_buffer(buffer, 0, bytemuck::cast_slice(data));
        self.bytes_to_gpu.fetch_add(byte_len, Ordering::Relaxed);

        Ok(())
    }

    /// Helper to create an empty GPU buffer (useful for shader outputs).
    /// Does not count towards `bytes_to_gpu` as no data is initially transferred.
    pub(crate) fn create_empty_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
        mapped_at_creation: bool,
    ) -> wgpu::Buffer {
        log::trace!("Creating empty GPU buffer '{}' of size {}", label, size);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation,
        })
    }

    /// Reads the contents of a GPU buffer back to the CPU.
    ///
    /// # Arguments
    /// * `buffer` - The GPU buffer to read from (must have `COPY_SRC` usage).
    /// * `element_count` - The number of elements of type `T` expected in the buffer.
    pub(crate) async fn read_buffer_to_cpu<T: Pod + Zeroable>(
        &self,
        buffer: &wgpu::Buffer,
        element_count: usize,
    ) -> Result<Vec<T>, SlaeError> {
        let element_size = std::mem::size_of::<T>();
        if element_size == 0 {
            return Err(SlaeError::Internal(
                "Cannot read zero-sized types".to_string(),
            ));
        }
        let size_bytes = (element_count * element_size) as u64;

        if size_bytes == 0 {
            log::debug!("Skipping readback for 0 bytes");
            return Ok(Vec::new());
        }
        if buffer.size() < size_bytes {
            return Err(SlaeError::Internal(format!(
                "GPU buffer size ({}) is smaller than expected size based on element count ({})",
                buffer.size(),
                size_bytes
            )));
        }

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_buffer_for_readback"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("read_buffer_encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging_buffer, 0, size_bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        // Map the staging buffer
        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            if let Err(e) = sender.send(result) {
                log::error!("Failed to send map result back: {:?}", e);
            }
        });

        self.bytes_from_gpu.fetch_add(size_bytes, Ordering::Relaxed);

        // Wait for mapping - poll only on native platforms
        cfg_if! {
            if #[cfg(not(target_arch = "wasm32"))] {
                let _ = self.device.poll(PollType::Wait); // Wait for GPU to finish copy and map
            } else {
                // On WASM, awaiting the receiver is sufficient and avoids blocking
            }
        }

        match receiver.await {
            Ok(Ok(())) => {
                let result = {
                    let data = buffer_slice.get_mapped_range();
                    let mapped_len = data.len();

                    if mapped_len != size_bytes as usize {
                        drop(data);
                        staging_buffer.unmap();
                        return Err(SlaeError::Internal(format!(
                            "Mapped data size ({}) does not match expected byte size ({})",
                            mapped_len, size_bytes
                        )));
                    }
                    if mapped_len % element_size != 0 {
                        drop(data);
                        staging_buffer.unmap();
                        return Err(SlaeError::Internal(format!(
                            "Mapped data size ({}) is not a multiple of element size ({})",
                            mapped_len, element_size
                        )));
                    }
                    let cast_result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
                    cast_result
                }; // mapped view dropped here

                staging_buffer.unmap();
                log::trace!("Buffer readback complete ({} bytes)", size_bytes);
                Ok(result)
            }
            Ok(Err(e)) => {
                log::error!("Failed to map buffer: {:?}", e);
                Err(SlaeError::WgpuError(format!("Buffer mapping failed: {}", e)))
            }
            Err(_) => Err(SlaeError::Internal(
                "Channel receive error during buffer mapping".to_string(),
            )),
        }
    }

    /// Returns the current transfer statistics.
    pub(crate) fn get_transfer_stats(&self) -> (u64, u64) {
        (
            self.bytes_to_gpu.load(Ordering::Relaxed),
            self.bytes_from_gpu.load(Ordering::Relaxed),
        )
    }

    /// Resets the transfer statistics counters to zero.
    pub(crate) fn reset_transfer_stats(&self) {
        self.bytes_to_gpu.store(0, Ordering::Relaxed);
        self.bytes_from_gpu.store(0, Ordering::Relaxed);
        log::info!("GPU transfer counters reset.");
    }
}
