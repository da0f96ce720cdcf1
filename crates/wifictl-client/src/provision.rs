//! Provisioning of the files the supplicant refuses to start without.
//!
//! The configuration file is seeded from a read-only template the first
//! time around; the entropy file gets fresh random seed bytes. Both end up
//! owner/group read-write only, optionally chowned to the daemon's user.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use rand::RngCore;
use tracing::debug;

/// Owner/group read-write, as the daemon expects its private files.
const FILE_MODE: u32 = 0o660;

/// Size of the entropy seed written on first provisioning.
const ENTROPY_SEED_LEN: usize = 21;

/// Make sure `path` exists with usable permissions, copying it from
/// `template` if missing. A partially written copy is removed on failure.
pub fn ensure_config_file(
    path: &Path,
    template: &Path,
    owner: Option<(u32, u32)>,
) -> io::Result<()> {
    match fs::metadata(path) {
        Ok(meta) => return restore_mode(path, &meta),
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
        Err(_) => {}
    }

    fs::copy(template, path)?;
    debug!(path = %path.display(), template = %template.display(), "seeded config file");
    finish_provisioning(path, owner)
}

/// Make sure the entropy file exists, creating it with random seed bytes
/// if missing.
pub fn ensure_entropy_file(path: &Path, owner: Option<(u32, u32)>) -> io::Result<()> {
    match fs::metadata(path) {
        Ok(meta) => return restore_mode(path, &meta),
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
        Err(_) => {}
    }

    let mut seed = [0u8; ENTROPY_SEED_LEN];
    rand::thread_rng().fill_bytes(&mut seed);
    fs::write(path, seed)?;
    debug!(path = %path.display(), "seeded entropy file");
    finish_provisioning(path, owner)
}

fn restore_mode(path: &Path, meta: &fs::Metadata) -> io::Result<()> {
    let mode = meta.permissions().mode() & 0o777;
    if mode & FILE_MODE != FILE_MODE {
        fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))?;
    }
    Ok(())
}

fn finish_provisioning(path: &Path, owner: Option<(u32, u32)>) -> io::Result<()> {
    let result = fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))
        .and_then(|_| apply_owner(path, owner));
    if result.is_err() {
        let _ = fs::remove_file(path);
    }
    result
}

fn apply_owner(path: &Path, owner: Option<(u32, u32)>) -> io::Result<()> {
    let Some((uid, gid)) = owner else {
        return Ok(());
    };
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}
