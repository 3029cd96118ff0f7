//! CPU affinity for the tick scheduler thread

use std::io;

/// Proof that a thread was pinned, handed back to [`CpuAffinity::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinLease {
    core: usize,
    thread: u64,
}

impl PinLease {
    pub fn new(core: usize, thread: u64) -> Self {
        Self { core, thread }
    }

    pub fn core(&self) -> usize {
        self.core
    }

    /// Platform thread handle the pin applies to
    pub fn thread(&self) -> u64 {
        self.thread
    }
}

/// Ability to bind the calling thread to a single core.
///
/// Pinning is best-effort: callers log a failure and carry on unpinned.
pub trait CpuAffinity: Send + Sync {
    fn pin_current_thread(&self, core: usize) -> io::Result<PinLease>;

    /// Undo the pin described by `lease`. The pinned thread must still be joinable.
    fn release(&self, lease: &PinLease);
}

/// Core used when none is configured: the last one, which the OS tends to load least
pub fn default_core() -> usize {
    num_cpus::get().saturating_sub(1)
}

/// The platform's affinity implementation
pub fn platform_affinity() -> std::sync::Arc<dyn CpuAffinity> {
    #[cfg(target_os = "linux")]
    {
        std::sync::Arc::new(ThreadAffinity)
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::sync::Arc::new(NoAffinity)
    }
}

/// Fallback that pins nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAffinity;

impl CpuAffinity for NoAffinity {
    fn pin_current_thread(&self, core: usize) -> io::Result<PinLease> {
        Ok(PinLease::new(core, 0))
    }

    fn release(&self, _lease: &PinLease) {}
}

/// `pthread_setaffinity_np` based pinning
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadAffinity;

#[cfg(target_os = "linux")]
impl ThreadAffinity {
    fn set_affinity(thread: libc::pthread_t, cores: impl Iterator<Item = usize>) -> io::Result<()> {
        // SAFETY: cpu_set_t is plain data; CPU_SET only writes within the set, and
        // `thread` refers to a live, joinable thread per the `CpuAffinity` contract.
        unsafe {
            let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut cpuset);
            for core in cores {
                libc::CPU_SET(core, &mut cpuset);
            }

            let result =
                libc::pthread_setaffinity_np(thread, std::mem::size_of::<libc::cpu_set_t>(), &cpuset);
            if result != 0 {
                return Err(io::Error::from_raw_os_error(result));
            }
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl CpuAffinity for ThreadAffinity {
    fn pin_current_thread(&self, core: usize) -> io::Result<PinLease> {
        let max = libc::CPU_SETSIZE as usize;
        if core >= max {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("core {core} exceeds CPU set size {max}"),
            ));
        }

        // SAFETY: pthread_self has no preconditions
        let thread = unsafe { libc::pthread_self() };
        Self::set_affinity(thread, std::iter::once(core))?;
        Ok(PinLease::new(core, thread as u64))
    }

    fn release(&self, lease: &PinLease) {
        let cores = num_cpus::get().min(libc::CPU_SETSIZE as usize);
        if let Err(e) = Self::set_affinity(lease.thread() as libc::pthread_t, 0..cores) {
            tracing::warn!(core = lease.core(), error = %e, "Failed to release CPU pin");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_affinity_is_infallible() {
        let affinity = NoAffinity;
        let lease = affinity.pin_current_thread(3).unwrap();
        assert_eq!(lease.core(), 3);
        affinity.release(&lease);
    }

    #[test]
    fn test_default_core_is_in_range() {
        assert!(default_core() < num_cpus::get().max(1));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_pin_and_release_on_spawned_thread() {
        let handle = std::thread::spawn(|| {
            let affinity = ThreadAffinity;
            // pinning may be refused in restricted sandboxes; either way release must not panic
            if let Ok(lease) = affinity.pin_current_thread(0) {
                assert_eq!(lease.core(), 0);
                affinity.release(&lease);
            }
        });
        handle.join().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_out_of_range_core_is_rejected() {
        let affinity = ThreadAffinity;
        let err = affinity.pin_current_thread(usize::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
