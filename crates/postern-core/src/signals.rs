//! Host environment signal probes feeding the device fingerprint.
//!
//! Each probe is an independent function returning `Option<String>` — `None`
//! when the signal is unavailable on this host or the underlying read fails.
//! A probe never panics and never propagates an error; the aggregate is a
//! plain fold over [`PROBES`] that substitutes a fixed per-probe sentinel
//! (`no-<name>`) for misses, so one broken signal degrades the fingerprint
//! instead of aborting it.
//!
//! Probe order is part of the fingerprint contract: reordering or renaming a
//! probe changes every fingerprint derived from this table.

use chrono::Local;

/// Named probe table, in fingerprint order.
pub const PROBES: &[(&str, fn() -> Option<String>)] = &[
    ("platform", platform),
    ("kernel", kernel_release),
    ("machine-id", machine_id),
    ("hostname", hostname),
    ("user", username),
    ("home", home_dir),
    ("shell", shell),
    ("locale", locale),
    ("timezone", timezone),
    ("utc-offset", utc_offset_minutes),
    ("cpus", hardware_concurrency),
    ("scratch", scratch_storage),
];

/// Run every probe, substituting `no-<name>` where a probe misses.
///
/// Returns the ordered `(name, value)` pairs and the number of probes that
/// produced a live (non-sentinel) value.
pub fn collect() -> (Vec<(&'static str, String)>, usize) {
    let mut live = 0;
    let values = PROBES
        .iter()
        .map(|(name, probe)| {
            let value = match probe() {
                Some(v) => {
                    live += 1;
                    v
                }
                None => format!("no-{name}"),
            };
            (*name, value)
        })
        .collect();
    (values, live)
}

fn platform() -> Option<String> {
    Some(format!(
        "{}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    ))
}

fn kernel_release() -> Option<String> {
    read_trimmed("/proc/sys/kernel/osrelease")
}

/// The strongest stable signal on Linux hosts — unique per installation.
fn machine_id() -> Option<String> {
    read_trimmed("/etc/machine-id").or_else(|| read_trimmed("/var/lib/dbus/machine-id"))
}

fn hostname() -> Option<String> {
    read_trimmed("/etc/hostname").or_else(|| env_nonempty("HOSTNAME"))
}

fn username() -> Option<String> {
    env_nonempty("USER").or_else(|| env_nonempty("LOGNAME"))
}

fn home_dir() -> Option<String> {
    env_nonempty("HOME")
}

fn shell() -> Option<String> {
    env_nonempty("SHELL")
}

fn locale() -> Option<String> {
    env_nonempty("LC_ALL").or_else(|| env_nonempty("LANG"))
}

fn timezone() -> Option<String> {
    env_nonempty("TZ").or_else(|| read_trimmed("/etc/timezone"))
}

fn utc_offset_minutes() -> Option<String> {
    let offset = Local::now().offset().local_minus_utc() / 60;
    Some(offset.to_string())
}

fn hardware_concurrency() -> Option<String> {
    std::thread::available_parallelism()
        .ok()
        .map(|n| n.get().to_string())
}

/// Whether scratch storage is writable at all — a coarse capability bit,
/// not an identifier.
fn scratch_storage() -> Option<String> {
    let path = std::env::temp_dir().join(format!(".postern-probe-{}", std::process::id()));
    match std::fs::write(&path, b"probe") {
        Ok(()) => {
            let _ = std::fs::remove_file(&path);
            Some("storage-ok".to_string())
        }
        Err(_) => Some("storage-unavailable".to_string()),
    }
}

fn read_trimmed(path: &str) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}
