use candle_core::Device;

pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) { tracing::info!(device = "metal", "embedding device selected"); return dev; }
    }
    tracing::info!(device = "cpu", "embedding device selected");
    Device::Cpu
}
