//! Backend detection and auto-selection.

use tracing::{debug, warn};

use super::{Backend, memory};

/// Information about a compute backend.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Backend type.
    pub backend: Backend,
    /// Human-readable name.
    pub name: &'static str,
    /// Whether backend is available.
    pub available: bool,
    /// Priority for auto-selection (higher = preferred).
    pub priority: u32,
    /// Description.
    pub description: &'static str,
}

/// Detect all available backends.
pub fn detect_backends() -> Vec<BackendInfo> {
    #[allow(unused_mut)]
    let mut backends = vec![BackendInfo {
        backend: Backend::Cpu,
        name: "CPU",
        available: true,
        priority: 10,
        description: "rayon workgroups, lane teams with simulated shared memory",
    }];

    #[cfg(feature = "wgpu")]
    {
        let wgpu_available = super::WgpuPrimitives::is_available();
        backends.push(BackendInfo {
            backend: Backend::Wgpu,
            name: "wgpu",
            available: wgpu_available,
            priority: if wgpu_available { 100 } else { 0 },
            description: "GPU compute shaders via wgpu (Vulkan/Metal/DX12)",
        });
    }

    backends.sort_by(|a, b| b.priority.cmp(&a.priority));
    backends
}

/// Select the best available backend.
///
/// `TESSERA_BACKEND` wins when it names an available backend.
pub fn select_best_backend() -> Backend {
    let backends = detect_backends();

    if let Some(name) = memory::backend_override() {
        match name.parse::<Backend>() {
            Ok(Backend::Auto) => {}
            Ok(forced) if backends.iter().any(|b| b.backend == forced && b.available) => {
                debug!(backend = %forced, "backend forced by TESSERA_BACKEND");
                return forced;
            }
            Ok(forced) => warn!(backend = %forced, "TESSERA_BACKEND names an unavailable backend"),
            Err(e) => warn!(error = %e, "ignoring TESSERA_BACKEND"),
        }
    }

    backends
        .into_iter()
        .filter(|b| b.available)
        .max_by_key(|b| b.priority)
        .map(|b| b.backend)
        .unwrap_or(Backend::Cpu)
}

/// Get description of available backends.
pub fn describe_backends() -> String {
    let mut desc = String::new();
    for info in detect_backends() {
        let status = if info.available { "+" } else { "-" };
        desc.push_str(&format!("[{}] {}: {}\n", status, info.name, info.description));
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_always_listed() {
        let backends = detect_backends();
        assert!(backends.iter().any(|b| b.backend == Backend::Cpu && b.available));
        assert!(describe_backends().contains("[+] CPU"));
    }

    #[test]
    fn test_best_is_available() {
        assert!(select_best_backend().is_available());
    }
}
