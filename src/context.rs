use wgpu::*;

/// Process-wide GPU handle: device + queue, acquired once at startup and held
/// by reference for the lifetime of the simulation (spec.md §9, "Global
/// state"). Unlike the teacher's `GpuState`, this type does not own a
/// swap-chain surface or a depth texture — renderers write into a
/// caller-provided `TextureView` each frame (spec.md §6 Outputs), so surface
/// acquisition/presentation is the embedding application's concern.
pub struct GpuContext {
    pub device: Device,
    pub queue: Queue,
    pub features: Features,
}

impl GpuContext {
    /// Acquire a high-performance adapter and request a device with the
    /// features this crate can make use of if present (subgroup ops for the
    /// density-splat and marching-cubes atomics, per spec.md §4.E/§9).
    pub async fn new() -> Result<Self, String> {
        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or("No suitable GPU adapter found.")?;

        log::info!("Using adapter: {:?}", adapter.get_info().name);

        let adapter_features = adapter.features();
        let wanted = Features::SUBGROUP | Features::TIMESTAMP_QUERY;
        let requested = adapter_features & wanted;

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("sph-fluid-core device"),
                    required_features: requested,
                    required_limits: Limits::default().using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| format!("Failed to create device: {e:?}"))?;

        Ok(Self {
            device,
            queue,
            features: requested,
        })
    }

    /// Whether the device reports subgroup support, gating the
    /// subgroup-coordinated allocator variant (spec.md §4.E, §9).
    pub fn supports_subgroups(&self) -> bool {
        self.features.contains(Features::SUBGROUP)
    }
}
