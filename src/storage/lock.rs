//! 文件锁 - 跨进程排他锁
//!
//! 两种策略：
//!
//! - `Native`（默认）：对 `.lock` 文件加操作系统的排他 advisory 锁
//!   (`fs2::FileExt::try_lock_exclusive`)。持有者崩溃时由内核释放，不需要过期判断。
//! - `Marker`：以 `create_new` 独占创建标记文件。标记超过 `stale_after_ms`
//!   视为被崩溃的持有者遗弃，删除后立即重试。
//!
//! 两种策略都会把随机 owner token 写入锁文件，释放前重新读取并核对 token，
//! 不会误释放别人在过期接管之后获得的锁。
//!
//! 获取过程是有界轮询：指数退避，受 `max_attempts` 和 `timeout_ms` 双重限制，
//! 超出即返回 `LockTimeout`。清除遗弃标记、锁文件被替换后的立即重试不计入尝试次数。
//!
//! 删除 team 时锁文件会随目录一起删除。Native 策略在拿到锁后核对句柄与路径
//! 仍是同一个文件，锁住已被 unlink 的旧文件时重新获取。

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use super::ensure_directory;
use crate::error::{Result, TeamError};

/// 锁策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    #[default]
    Native,
    Marker,
}

impl std::fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockStrategy::Native => write!(f, "native"),
            LockStrategy::Marker => write!(f, "marker"),
        }
    }
}

impl FromStr for LockStrategy {
    type Err = TeamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "native" | "flock" => Ok(LockStrategy::Native),
            "marker" | "file" => Ok(LockStrategy::Marker),
            _ => Err(TeamError::UnknownVariant {
                kind: "lock strategy",
                value: s.to_string(),
            }),
        }
    }
}

/// 锁参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    pub strategy: LockStrategy,
    /// marker 超过该时长视为遗弃
    pub stale_after_ms: u64,
    /// 整体等待预算
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            strategy: LockStrategy::Native,
            stale_after_ms: 5_000,
            timeout_ms: 10_000,
            max_attempts: 200,
            initial_backoff_ms: 5,
            max_backoff_ms: 200,
        }
    }
}

impl LockOptions {
    pub fn marker() -> Self {
        Self {
            strategy: LockStrategy::Marker,
            ..Self::default()
        }
    }

    fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

enum Attempt {
    Acquired(FileLock),
    Busy,
    /// 遗弃的 marker 已被清除，或锁文件已被替换，立即重试
    Retry,
}

/// 已持有的锁；drop 时自动释放
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    token: String,
    strategy: LockStrategy,
    /// Native 策略下持有的文件句柄
    file: Option<File>,
    released: bool,
}

impl FileLock {
    /// 获取锁（有界轮询）
    pub fn acquire(path: &Path, options: &LockOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }

        let token = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let max_backoff = Duration::from_millis(options.max_backoff_ms.max(1));
        let mut backoff = Duration::from_millis(options.initial_backoff_ms.max(1));
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let attempt = match options.strategy {
                LockStrategy::Native => Self::try_native(path, &token)?,
                LockStrategy::Marker => Self::try_marker(path, &token, options.stale_after())?,
            };

            match attempt {
                Attempt::Acquired(lock) => {
                    debug!(path = %path.display(), attempts, "Lock acquired");
                    return Ok(lock);
                }
                Attempt::Retry => {
                    attempts -= 1;
                    if started.elapsed() < options.timeout() {
                        continue;
                    }
                }
                Attempt::Busy => {}
            }

            let elapsed = started.elapsed();
            if attempts >= options.max_attempts.max(1) || elapsed >= options.timeout() {
                warn!(
                    path = %path.display(),
                    attempts,
                    waited_ms = elapsed.as_millis() as u64,
                    "Lock acquisition timed out"
                );
                return Err(TeamError::LockTimeout {
                    path: path.to_path_buf(),
                    attempts,
                    waited_ms: elapsed.as_millis(),
                });
            }

            let remaining = options.timeout().saturating_sub(elapsed);
            thread::sleep(backoff.min(remaining));
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    fn try_native(path: &Path, token: &str) -> Result<Attempt> {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return recreate_parent(path),
            Err(e) => return Err(e.into()),
        };

        match file.try_lock_exclusive() {
            Ok(()) => {
                if !is_same_file(&file, path)? {
                    debug!(path = %path.display(), "Lock file replaced while waiting, retrying");
                    FileExt::unlock(&file)?;
                    return Ok(Attempt::Retry);
                }
                file.set_len(0)?;
                (&file).write_all(token.as_bytes())?;
                Ok(Attempt::Acquired(FileLock {
                    path: path.to_path_buf(),
                    token: token.to_string(),
                    strategy: LockStrategy::Native,
                    file: Some(file),
                    released: false,
                }))
            }
            Err(e) if is_contended(&e) => Ok(Attempt::Busy),
            Err(e) => Err(e.into()),
        }
    }

    fn try_marker(path: &Path, token: &str, stale_after: Duration) -> Result<Attempt> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                file.write_all(token.as_bytes())?;
                file.sync_all()?;
                Ok(Attempt::Acquired(FileLock {
                    path: path.to_path_buf(),
                    token: token.to_string(),
                    strategy: LockStrategy::Marker,
                    file: None,
                    released: false,
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let modified = match fs::metadata(path).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    // 在检查之间被持有者删除
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Attempt::Retry),
                    Err(e) => return Err(e.into()),
                };

                let age = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO);
                if age <= stale_after {
                    return Ok(Attempt::Busy);
                }

                info!(
                    path = %path.display(),
                    age_ms = age.as_millis() as u64,
                    "Removing stale lock marker"
                );
                match fs::remove_file(path) {
                    Ok(()) => Ok(Attempt::Retry),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(Attempt::Retry),
                    Err(e) => Err(e.into()),
                }
            }
            // 所在目录随 team 一起被删除
            Err(e) if e.kind() == ErrorKind::NotFound => recreate_parent(path),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// 显式释放，返回释放过程中的 I/O 错误
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let owned = match fs::read_to_string(&self.path) {
            Ok(content) => Some(content == self.token),
            // 锁文件随所在目录一起被删除
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                if let Some(file) = self.file.take() {
                    let _ = FileExt::unlock(&file);
                }
                return Err(e.into());
            }
        };

        if owned == Some(false) {
            warn!(
                path = %self.path.display(),
                "Lock file no longer carries our token, leaving it in place"
            );
        }

        let owned = owned.unwrap_or(false);
        match self.strategy {
            LockStrategy::Marker => {
                if owned {
                    match fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            LockStrategy::Native => {
                if let Some(file) = self.file.take() {
                    if owned {
                        file.set_len(0)?;
                    }
                    FileExt::unlock(&file)?;
                }
            }
        }

        debug!(path = %self.path.display(), "Lock released");
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

fn recreate_parent(path: &Path) -> Result<Attempt> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    Ok(Attempt::Retry)
}

/// 持有的句柄与路径当前指向的是否同一个文件
#[cfg(unix)]
fn is_same_file(file: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn is_same_file(_file: &File, path: &Path) -> Result<bool> {
    Ok(path.exists())
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
