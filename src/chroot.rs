//! Chroot preparation for package installation
//!
//! Maintainer scripts run inside the target and expect `/proc`, `/sys` and
//! `/dev` to be there, and they must not start services in the half-built
//! system. [`ChrootGuard`] sets both up and undoes them, in reverse order, when
//! it is torn down or dropped.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use tracing::{debug, error, info};

use crate::error::{InstallError, Result};

/// invoke-rc.d consults this before starting a service; exit 101 denies it.
pub const POLICY_RC_D: &str = "usr/sbin/policy-rc.d";

const POLICY_SCRIPT: &str = "#!/bin/sh\nexit 101\n";
const POLICY_BACKUP_SUFFIX: &str = ".install-extras";

/// Host paths bind-mounted into the target by default.
pub const DEFAULT_BIND_MOUNTS: &[&str] = &["/proc", "/sys", "/dev", "/dev/pts"];

/// What to prepare inside the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChrootOptions {
    pub bind_mounts: Vec<PathBuf>,
    pub block_service_starts: bool,
}

/// Mount operations used by [`ChrootGuard`].
pub trait Mounter {
    fn bind(&mut self, source: &Path, target: &Path) -> Result<()>;

    fn unmount(&mut self, target: &Path) -> Result<()>;
}

/// Real bind mounts through `mount(2)`.
#[derive(Debug, Default)]
pub struct SystemMounter;

impl Mounter for SystemMounter {
    fn bind(&mut self, source: &Path, target: &Path) -> Result<()> {
        fs::create_dir_all(target)?;
        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| {
            InstallError::mount(format!(
                "failed to bind {} on {}: {}",
                source.display(),
                target.display(),
                e
            ))
        })?;
        debug!("Bound {} on {}", source.display(), target.display());
        Ok(())
    }

    fn unmount(&mut self, target: &Path) -> Result<()> {
        umount2(target, MntFlags::MNT_DETACH).map_err(|e| {
            InstallError::mount(format!("failed to unmount {}: {}", target.display(), e))
        })?;
        debug!("Unmounted {}", target.display());
        Ok(())
    }
}

/// Mounter for dry runs; only logs what would be mounted.
#[derive(Debug, Default)]
pub struct NoopMounter;

impl Mounter for NoopMounter {
    fn bind(&mut self, source: &Path, target: &Path) -> Result<()> {
        info!("[dry-run] would bind {} on {}", source.display(), target.display());
        Ok(())
    }

    fn unmount(&mut self, target: &Path) -> Result<()> {
        info!("[dry-run] would unmount {}", target.display());
        Ok(())
    }
}

/// Where `source` appears inside `target`.
pub fn mount_point(target: &Path, source: &Path) -> PathBuf {
    target.join(source.strip_prefix("/").unwrap_or(source))
}

#[derive(Debug)]
struct PolicyFile {
    path: PathBuf,
    backup: Option<PathBuf>,
}

impl PolicyFile {
    fn install(target: &Path) -> Result<Self> {
        Self::install_with(target, Self::write_script)
    }

    /// Move any existing policy aside and run `write`. The existing policy
    /// is put back when `write` fails.
    fn install_with<F>(target: &Path, write: F) -> Result<Self>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let path = target.join(POLICY_RC_D);
        let backup = if path.exists() {
            let mut name = OsString::from(path.as_os_str());
            name.push(POLICY_BACKUP_SUFFIX);
            let backup = PathBuf::from(name);
            fs::rename(&path, &backup)?;
            Some(backup)
        } else {
            None
        };

        let policy = Self { path, backup };
        if let Err(e) = write(&policy.path) {
            let _ = fs::remove_file(&policy.path);
            if let Err(restore) = policy.restore_backup() {
                error!("Failed to restore {}: {}", POLICY_RC_D, restore);
            }
            return Err(e);
        }
        debug!("Installed {}", policy.path.display());
        Ok(policy)
    }

    fn write_script(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, POLICY_SCRIPT)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    fn restore_backup(&self) -> Result<()> {
        if let Some(backup) = &self.backup {
            fs::rename(backup, &self.path)?;
        }
        Ok(())
    }

    /// Remove our policy and put the previous one back. The restore is
    /// attempted even when the removal fails.
    fn remove(self) -> Result<()> {
        let removed: Result<()> = match fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        };
        let restored = self.restore_backup();
        removed.and(restored)
    }
}

/// Bind mounts and service policy held for the duration of a commit.
pub struct ChrootGuard<'m, M: Mounter + ?Sized> {
    target: PathBuf,
    mounter: &'m mut M,
    mounted: Vec<PathBuf>,
    policy: Option<PolicyFile>,
    released: bool,
}

impl<'m, M: Mounter + ?Sized> ChrootGuard<'m, M> {
    /// Prepare `target`. Whatever was set up before a failure is undone.
    pub fn setup(target: &Path, options: &ChrootOptions, mounter: &'m mut M) -> Result<Self> {
        let mut guard = Self {
            target: target.to_path_buf(),
            mounter,
            mounted: Vec::new(),
            policy: None,
            released: false,
        };

        for source in &options.bind_mounts {
            let point = mount_point(target, source);
            guard.mounter.bind(source, &point)?;
            guard.mounted.push(point);
        }

        if options.block_service_starts {
            guard.policy = Some(PolicyFile::install(target)?);
        }

        info!("Prepared chroot at {}", target.display());
        Ok(guard)
    }

    /// Mount points currently held, in mount order.
    pub fn mounted(&self) -> &[PathBuf] {
        &self.mounted
    }

    pub fn teardown(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_err = None;
        if let Some(policy) = self.policy.take() {
            if let Err(e) = policy.remove() {
                error!("Failed to remove {}: {}", POLICY_RC_D, e);
                first_err.get_or_insert(e);
            }
        }
        while let Some(point) = self.mounted.pop() {
            if let Err(e) = self.mounter.unmount(&point) {
                error!("{}", e);
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => {
                debug!("Cleaned up chroot at {}", self.target.display());
                Ok(())
            }
        }
    }
}

impl<M: Mounter + ?Sized> Drop for ChrootGuard<'_, M> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!("Chroot cleanup failed: {}", e);
        }
    }
}
