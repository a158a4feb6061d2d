use crate::resource::Identity;
use crate::types::{Error, Result};
use log::{debug, info, warn};
use moka::future::Cache;
use std::future::Future;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of resolving a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub identity: Identity,
    /// Absolute form of the path as given. A symlink keeps its own name here
    /// while `identity` names its target.
    pub canonical_path: String,
}

pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, path: &str) -> impl Future<Output = Result<Resolved>> + Send;
}

impl<T: IdentityResolver> IdentityResolver for Arc<T> {
    fn resolve(&self, path: &str) -> impl Future<Output = Result<Resolved>> + Send {
        (**self).resolve(path)
    }
}

/// Resolves paths against the running system, naming block devices through sysfs.
pub struct SysfsResolver {
    sysfs_root: PathBuf,
    device_name_by_dev: Cache<(u32, u32), Arc<str>>,
}

impl Default for SysfsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsResolver {
    pub fn new() -> Self {
        Self::with_sysfs_root("/sys")
    }

    pub fn with_sysfs_root(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            device_name_by_dev: Cache::builder()
                .max_capacity(100)
                .time_to_idle(Duration::from_secs(60))
                .time_to_live(Duration::from_secs(300))
                .build(),
        }
    }

    /// Name of the block device `major:minor`, e.g. `sda1`.
    pub async fn block_device_name(&self, major: u32, minor: u32) -> Result<Arc<str>> {
        if let Some(name) = self.device_name_by_dev.get(&(major, minor)).await {
            return Ok(name);
        }

        let path = self
            .sysfs_root
            .join(format!("dev/block/{major}:{minor}/uevent"));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) => return Err(Error::Path(err, path.display().to_string())),
        };

        let name: Arc<str> = content
            .lines()
            .find_map(|line| line.strip_prefix("DEVNAME="))
            .map(Arc::from)
            .ok_or_else(|| Error::NoBackingDevice(format!("{major}:{minor}")))?;

        self.device_name_by_dev
            .insert((major, minor), Arc::clone(&name))
            .await;
        Ok(name)
    }

    /// Same as [`SysfsResolver::block_device_name`] for a kernel-internal device number.
    pub async fn kernel_device_name(&self, dev: u32) -> Result<Arc<str>> {
        self.block_device_name(kernel_major(dev), kernel_minor(dev))
            .await
    }
}

pub const fn kernel_major(dev: u32) -> u32 {
    (dev >> 20) & 0xfff
}

pub const fn kernel_minor(dev: u32) -> u32 {
    dev & 0xfffff
}

/// Absolute path naming `path` itself: parents are canonicalized, a final
/// symlink is kept.
async fn absolute_path(path: &str) -> std::io::Result<PathBuf> {
    let given = Path::new(path);
    match (given.parent(), given.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            Ok(tokio::fs::canonicalize(parent).await?.join(name))
        }
        _ => tokio::fs::canonicalize(given).await,
    }
}

impl IdentityResolver for SysfsResolver {
    async fn resolve(&self, path: &str) -> Result<Resolved> {
        let not_found = |err| Error::PathNotFound(path.to_owned(), err);

        let absolute = absolute_path(path).await.map_err(not_found)?;
        let canonical_path = absolute.to_string_lossy().into_owned();
        if canonical_path != path {
            debug!("{path} absolute path = {canonical_path}");
        }

        let link = tokio::fs::symlink_metadata(&absolute)
            .await
            .map_err(not_found)?;
        if link.file_type().is_symlink() {
            info!("{canonical_path} is a symlink");
        }

        // Follows symlinks: the identity is the target's.
        let meta = tokio::fs::metadata(&absolute).await.map_err(not_found)?;
        if meta.ino() == 0 {
            return Err(Error::NoInode(path.to_owned()));
        }

        let dev = meta.dev();
        let major = nix::sys::stat::major(dev) as u32;
        let minor = nix::sys::stat::minor(dev) as u32;
        let device = match self.block_device_name(major, minor).await {
            Ok(device) => device,
            Err(err) => {
                warn!("no bdev for {path}: {err}");
                return Err(Error::NoBackingDevice(path.to_owned()));
            }
        };

        Ok(Resolved {
            identity: Identity::new(device, meta.ino()),
            canonical_path,
        })
    }
}
