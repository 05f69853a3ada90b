use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use crate::error::{Error, Result};

/// Empirically validated per-worker memory cost.
pub const MEMORY_PER_WORKER_BYTES: u64 = 1024 * 1024;

/// CPU percentage reserved for system stability.
pub const CPU_OVERHEAD_PERCENT: f32 = 20.0;

/// Empirical ratio of workers per free CPU percent.
pub const WORKERS_PER_CPU_PERCENT: u64 = 10;

/// Hard cap on granted concurrency regardless of headroom.
pub const HARD_WORKER_CAP: u64 = 2000;

/// Utilization at which the host counts as saturated.
pub const SATURATION_PERCENT: f32 = 80.0;

/// Instantaneous host utilization, taken once before a run starts.
#[derive(Debug, Clone, Copy)]
pub struct SystemSnapshot {
    pub cpu_used_percent: f32,
    pub memory_available_bytes: u64,
    pub memory_used_percent: f32,
}

/// Concurrency the host can safely sustain for the requested worker count.
#[derive(Debug, Clone, Copy)]
pub struct SafeConcurrency {
    pub requested: u64,
    pub memory_ceiling: u64,
    pub cpu_ceiling: u64,
    pub granted: u64,
}

/// Samples CPU and memory utilization. Blocking: CPU usage needs two
/// refreshes separated by the sysinfo minimum interval.
pub fn sample_system() -> SystemSnapshot {
    let refresh = RefreshKind::nothing()
        .with_cpu(CpuRefreshKind::everything())
        .with_memory(MemoryRefreshKind::everything());
    let mut sys = System::new_with_specifics(refresh);

    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let total = sys.total_memory().max(1);
    SystemSnapshot {
        cpu_used_percent: sys.global_cpu_usage(),
        memory_available_bytes: sys.available_memory(),
        memory_used_percent: (sys.used_memory() as f64 / total as f64 * 100.0) as f32,
    }
}

/// Pure capacity math over a snapshot. Refuses a host where CPU and memory
/// are both saturated, or one where the ceilings leave no room for a single
/// worker.
pub fn capacity_for(snapshot: SystemSnapshot, requested: u64) -> Result<SafeConcurrency> {
    if snapshot.cpu_used_percent >= SATURATION_PERCENT
        && snapshot.memory_used_percent >= SATURATION_PERCENT
    {
        return Err(Error::InsufficientResources {
            cpu: snapshot.cpu_used_percent,
            memory: snapshot.memory_used_percent,
        });
    }

    let memory_ceiling = snapshot.memory_available_bytes / MEMORY_PER_WORKER_BYTES;

    let cpu_headroom = (100.0 - snapshot.cpu_used_percent - CPU_OVERHEAD_PERCENT).max(0.0);
    let cpu_ceiling = (cpu_headroom as u64).saturating_mul(WORKERS_PER_CPU_PERCENT);

    let granted = requested
        .min(memory_ceiling)
        .min(cpu_ceiling)
        .min(HARD_WORKER_CAP);

    if granted == 0 {
        return Err(Error::InsufficientResources {
            cpu: snapshot.cpu_used_percent,
            memory: snapshot.memory_used_percent,
        });
    }

    Ok(SafeConcurrency {
        requested,
        memory_ceiling,
        cpu_ceiling,
        granted,
    })
}

/// Capacity check against the live host. The sysinfo sampling runs on a
/// blocking thread so it never stalls the scheduler.
pub async fn capacity(requested: u64) -> Result<SafeConcurrency> {
    let snapshot = tokio::task::spawn_blocking(sample_system).await?;
    capacity_for(snapshot, requested)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn idle_host() -> SystemSnapshot {
        SystemSnapshot {
            cpu_used_percent: 10.0,
            memory_available_bytes: 8 * 1024 * 1024 * 1024,
            memory_used_percent: 30.0,
        }
    }

    #[test]
    fn grants_requested_concurrency_on_an_idle_host() {
        let safe = capacity_for(idle_host(), 100).unwrap();
        assert_eq!(safe.granted, 100);
        assert!(safe.memory_ceiling >= 100);
        assert!(safe.cpu_ceiling >= 100);
    }

    #[test]
    fn applies_the_hard_cap() {
        let safe = capacity_for(idle_host(), 50_000).unwrap();
        assert_eq!(safe.granted, HARD_WORKER_CAP);
    }

    #[test]
    fn memory_bound_host_limits_workers() {
        let snapshot = SystemSnapshot {
            memory_available_bytes: 16 * MEMORY_PER_WORKER_BYTES,
            ..idle_host()
        };
        let safe = capacity_for(snapshot, 100).unwrap();
        assert_eq!(safe.memory_ceiling, 16);
        assert_eq!(safe.granted, 16);
    }

    #[test]
    fn cpu_bound_host_limits_workers() {
        let snapshot = SystemSnapshot {
            cpu_used_percent: 75.0,
            ..idle_host()
        };
        let safe = capacity_for(snapshot, 200).unwrap();
        // 100 - 75 - 20 = 5% headroom => 50 workers.
        assert_eq!(safe.cpu_ceiling, 50);
        assert_eq!(safe.granted, 50);
    }

    #[test]
    fn refuses_a_saturated_host() {
        let snapshot = SystemSnapshot {
            cpu_used_percent: 92.0,
            memory_available_bytes: 128 * 1024 * 1024,
            memory_used_percent: 95.0,
        };
        assert!(matches!(
            capacity_for(snapshot, 10),
            Err(Error::InsufficientResources { .. })
        ));
    }

    #[test]
    fn high_cpu_alone_is_not_saturation_while_room_remains() {
        let snapshot = SystemSnapshot {
            cpu_used_percent: 85.0,
            memory_used_percent: 20.0,
            ..idle_host()
        };
        // No CPU headroom at all => nothing can be granted.
        assert!(matches!(
            capacity_for(snapshot, 10),
            Err(Error::InsufficientResources { .. })
        ));

        let snapshot = SystemSnapshot {
            cpu_used_percent: 70.0,
            memory_used_percent: 85.0,
            ..idle_host()
        };
        let safe = capacity_for(snapshot, 10).unwrap();
        assert_eq!(safe.granted, 10);
    }
}
