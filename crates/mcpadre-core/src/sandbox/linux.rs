//! Linux enforcement: Landlock path-beneath allowlist rules applied to the
//! child process before exec.
//!
//! Grounded directly in `atomize-hq-substrate/crates/world/src/landlock.rs`:
//! same raw `landlock_create_ruleset`/`landlock_add_rule`/
//! `landlock_restrict_self` syscalls via `linux_raw_sys`, same
//! `prctl::set_no_new_privileges` gate, same `O_PATH` rule-target opens.
//! Collapsed to this crate's two-tier read/read-write model instead of the
//! three-tier exec/read/write policy the source supports, since mcpadre
//! servers never need a separate exec allowlist.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::mem;
use std::os::fd::RawFd;

use linux_raw_sys::{general, landlock};

use super::{FinalizedSandbox, SandboxError, SandboxPolicy};

pub(super) fn validate() -> Result<(), SandboxError> {
    detect_abi().map(|_| ())
}

pub(super) fn finalize(policy: &SandboxPolicy, _argv: &[String]) -> Result<FinalizedSandbox, SandboxError> {
    Ok(FinalizedSandbox::LinuxLandlock {
        read_paths: policy
            .allow_read
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        write_paths: policy
            .allow_read_write
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
    })
}

/// Called from the child side of a `pre_exec` hook (§4.3): applies the
/// Landlock ruleset to the *current* (about-to-exec) process. Must run after
/// `fork` and before `exec`; any error here aborts the spawn per
/// `std::process::Command::pre_exec`'s contract.
pub fn apply_in_child(read_paths: &[String], write_paths: &[String]) -> std::io::Result<()> {
    apply_filesystem_policy(read_paths, write_paths)
        .map_err(std::io::Error::other)
}

fn apply_filesystem_policy(read_paths: &[String], write_paths: &[String]) -> Result<(), String> {
    let abi = detect_abi()?;

    if read_paths.is_empty() && write_paths.is_empty() {
        return Ok(());
    }

    prctl::set_no_new_privileges(true).map_err(|code| format!("set_no_new_privileges failed: {code}"))?;

    let read_mask = read_access_mask(abi);
    let write_mask = write_access_mask(abi);

    let mut allowlist: BTreeMap<&str, u64> = BTreeMap::new();
    for path in read_paths {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            continue;
        }
        *allowlist.entry(trimmed).or_default() |= read_mask;
    }
    for path in write_paths {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            continue;
        }
        *allowlist.entry(trimmed).or_default() |= write_mask;
    }

    let handled_access_fs = allowlist.values().fold(0u64, |acc, mask| acc | *mask) & abi_supported_access_fs(abi);
    let ruleset_attr = landlock::landlock_ruleset_attr { handled_access_fs };
    let ruleset_fd = unsafe { landlock_create_ruleset(&ruleset_attr) }?;

    for (path, access) in allowlist {
        if access == 0 {
            continue;
        }
        let fd = match open_opath(path) {
            Ok(fd) => fd,
            Err(OpenError::NotFound) => continue,
            Err(OpenError::Other(err)) => {
                unsafe { libc::close(ruleset_fd) };
                return Err(err);
            }
        };
        let attr = landlock::landlock_path_beneath_attr {
            allowed_access: access,
            parent_fd: fd,
        };
        let added = unsafe { landlock_add_rule(ruleset_fd, &attr) };
        unsafe { libc::close(fd) };
        if let Err(err) = added {
            unsafe { libc::close(ruleset_fd) };
            return Err(err);
        }
    }

    let result = unsafe { landlock_restrict_self(ruleset_fd) };
    unsafe { libc::close(ruleset_fd) };
    result
}

fn abi_supported_access_fs(abi: u32) -> u64 {
    let mut mask = landlock::LANDLOCK_ACCESS_FS_EXECUTE as u64
        | landlock::LANDLOCK_ACCESS_FS_WRITE_FILE as u64
        | landlock::LANDLOCK_ACCESS_FS_READ_FILE as u64
        | landlock::LANDLOCK_ACCESS_FS_READ_DIR as u64
        | landlock::LANDLOCK_ACCESS_FS_REMOVE_DIR as u64
        | landlock::LANDLOCK_ACCESS_FS_REMOVE_FILE as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_CHAR as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_DIR as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_REG as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_SOCK as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_FIFO as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_BLOCK as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_SYM as u64;
    if abi >= 2 {
        mask |= landlock::LANDLOCK_ACCESS_FS_REFER as u64;
    }
    if abi >= 3 {
        mask |= landlock::LANDLOCK_ACCESS_FS_TRUNCATE as u64;
    }
    mask
}

fn read_access_mask(abi: u32) -> u64 {
    abi_supported_access_fs(abi)
        & (landlock::LANDLOCK_ACCESS_FS_EXECUTE as u64
            | landlock::LANDLOCK_ACCESS_FS_READ_FILE as u64
            | landlock::LANDLOCK_ACCESS_FS_READ_DIR as u64)
}

fn write_access_mask(abi: u32) -> u64 {
    let supported = abi_supported_access_fs(abi);
    let mask = landlock::LANDLOCK_ACCESS_FS_EXECUTE as u64
        | landlock::LANDLOCK_ACCESS_FS_READ_FILE as u64
        | landlock::LANDLOCK_ACCESS_FS_READ_DIR as u64
        | landlock::LANDLOCK_ACCESS_FS_WRITE_FILE as u64
        | landlock::LANDLOCK_ACCESS_FS_REMOVE_DIR as u64
        | landlock::LANDLOCK_ACCESS_FS_REMOVE_FILE as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_CHAR as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_DIR as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_REG as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_SOCK as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_FIFO as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_BLOCK as u64
        | landlock::LANDLOCK_ACCESS_FS_MAKE_SYM as u64;
    supported & mask
}

fn detect_abi() -> Result<u32, String> {
    let ret = unsafe {
        libc::syscall(
            general::__NR_landlock_create_ruleset as libc::c_long,
            std::ptr::null::<libc::c_void>(),
            0usize,
            landlock::LANDLOCK_CREATE_RULESET_VERSION,
        )
    };
    if ret < 0 {
        return Err(format!("landlock unavailable: {}", std::io::Error::last_os_error()));
    }
    Ok(ret as u32)
}

unsafe fn landlock_create_ruleset(attr: &landlock::landlock_ruleset_attr) -> Result<RawFd, String> {
    let ret = unsafe {
        libc::syscall(
            general::__NR_landlock_create_ruleset as libc::c_long,
            attr as *const landlock::landlock_ruleset_attr,
            mem::size_of::<landlock::landlock_ruleset_attr>(),
            0u32,
        )
    };
    if ret < 0 {
        return Err(format!("landlock create_ruleset failed: {}", std::io::Error::last_os_error()));
    }
    Ok(ret as RawFd)
}

unsafe fn landlock_add_rule(ruleset_fd: RawFd, attr: &landlock::landlock_path_beneath_attr) -> Result<(), String> {
    let ret = unsafe {
        libc::syscall(
            general::__NR_landlock_add_rule as libc::c_long,
            ruleset_fd,
            landlock::landlock_rule_type::LANDLOCK_RULE_PATH_BENEATH as u32,
            attr as *const landlock::landlock_path_beneath_attr,
            0u32,
        )
    };
    if ret < 0 {
        return Err(format!("landlock add_rule failed: {}", std::io::Error::last_os_error()));
    }
    Ok(())
}

unsafe fn landlock_restrict_self(ruleset_fd: RawFd) -> Result<(), String> {
    let ret = unsafe {
        libc::syscall(
            general::__NR_landlock_restrict_self as libc::c_long,
            ruleset_fd,
            0u32,
        )
    };
    if ret < 0 {
        return Err(format!("landlock restrict_self failed: {}", std::io::Error::last_os_error()));
    }
    Ok(())
}

enum OpenError {
    NotFound,
    Other(String),
}

fn open_opath(path: &str) -> Result<RawFd, OpenError> {
    let cstr = CString::new(path).map_err(|e| OpenError::Other(format!("invalid path {path:?}: {e}")))?;
    let fd = unsafe { libc::open(cstr.as_ptr(), libc::O_PATH | libc::O_CLOEXEC) };
    if fd < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::NotFound {
            return Err(OpenError::NotFound);
        }
        return Err(OpenError::Other(format!("failed to open {path:?} for landlock: {err}")));
    }
    Ok(fd)
}
