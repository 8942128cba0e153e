//! `file.*` actions: copy, mkdir, remove, unzip, download.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::info;

use super::{decode, decode_shorthand, Action, ActionError, ActionRegistry};
use crate::context::ExecContext;
use crate::io;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

pub fn register(registry: &mut ActionRegistry) {
    registry.register("file.copy", build_copy);
    registry.register("file.mkdir", build_mkdir);
    registry.register("file.remove", build_remove);
    registry.register("file.unzip", build_unzip);
    registry.register("file.download", build_download);
}

/// Run blocking filesystem work off the async executor.
async fn blocking<T, F>(action: &'static str, work: F) -> Result<T, ActionError>
where
    F: FnOnce() -> Result<T, ActionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ActionError::failed(action, format!("worker panicked: {e}")))?
}

// ---------------------------------------------------------------------------
// file.copy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CopyConfig {
    pub src: String,
    pub dst: String,
    /// Allow `src` to be a directory, copied recursively.
    pub dirs: bool,
}

#[derive(Debug)]
pub struct FileCopy {
    pub config: CopyConfig,
}

fn build_copy(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    Ok(Box::new(FileCopy {
        config: decode("file.copy", value)?,
    }))
}

#[async_trait]
impl Action for FileCopy {
    fn validate(&self) -> Result<(), ActionError> {
        if self.config.src.is_empty() || self.config.dst.is_empty() {
            return Err(ActionError::invalid("file.copy", "src and dst are required"));
        }
        Ok(())
    }

    async fn run(&self, _ctx: &ExecContext) -> Result<(), ActionError> {
        info!(src = %self.config.src, dst = %self.config.dst, "file.copy");
        let cfg = self.config.clone();
        blocking("file.copy", move || {
            let src = Path::new(&cfg.src);
            let dst = Path::new(&cfg.dst);
            let meta = std::fs::metadata(src)
                .map_err(|e| ActionError::io("file.copy", format!("cannot stat {}", cfg.src), e))?;
            if meta.is_dir() {
                if !cfg.dirs {
                    return Err(ActionError::failed(
                        "file.copy",
                        format!("{} is a directory; set dirs: true to copy it", cfg.src),
                    ));
                }
                return io::copy_dir_all(src, dst)
                    .map_err(|e| ActionError::io("file.copy", format!("copying {}", cfg.src), e));
            }
            if let Some(parent) = dst.parent() {
                io::ensure_dir(parent)
                    .map_err(|e| ActionError::io("file.copy", format!("creating {}", parent.display()), e))?;
            }
            std::fs::copy(src, dst)
                .map(|_| ())
                .map_err(|e| ActionError::io("file.copy", format!("copying {}", cfg.src), e))
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// file.mkdir / file.remove
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    pub path: String,
}

impl PathConfig {
    fn require(&self, action: &str) -> Result<(), ActionError> {
        if self.path.is_empty() {
            Err(ActionError::invalid(action, "path is required"))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
pub struct FileMkdir {
    pub config: PathConfig,
}

fn build_mkdir(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    Ok(Box::new(FileMkdir {
        config: decode_shorthand("file.mkdir", "path", value)?,
    }))
}

#[async_trait]
impl Action for FileMkdir {
    fn validate(&self) -> Result<(), ActionError> {
        self.config.require("file.mkdir")
    }

    async fn run(&self, _ctx: &ExecContext) -> Result<(), ActionError> {
        info!(path = %self.config.path, "file.mkdir");
        tokio::fs::create_dir_all(&self.config.path)
            .await
            .map_err(|e| ActionError::io("file.mkdir", format!("creating {}", self.config.path), e))
    }
}

#[derive(Debug)]
pub struct FileRemove {
    pub config: PathConfig,
}

fn build_remove(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    Ok(Box::new(FileRemove {
        config: decode_shorthand("file.remove", "path", value)?,
    }))
}

#[async_trait]
impl Action for FileRemove {
    fn validate(&self) -> Result<(), ActionError> {
        self.config.require("file.remove")
    }

    async fn run(&self, _ctx: &ExecContext) -> Result<(), ActionError> {
        info!(path = %self.config.path, "file.remove");
        let path = PathBuf::from(&self.config.path);
        blocking("file.remove", move || {
            io::remove_all(&path)
                .map_err(|e| ActionError::io("file.remove", format!("removing {}", path.display()), e))
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// file.unzip
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnzipConfig {
    pub src: String,
    pub dst: String,
}

#[derive(Debug)]
pub struct FileUnzip {
    pub config: UnzipConfig,
}

fn build_unzip(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    Ok(Box::new(FileUnzip {
        config: decode("file.unzip", value)?,
    }))
}

fn extract(src: &Path, dst: &Path) -> Result<usize, ActionError> {
    const ACTION: &str = "file.unzip";
    let file = std::fs::File::open(src)
        .map_err(|e| ActionError::io(ACTION, format!("opening {}", src.display()), e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ActionError::failed(ACTION, format!("{}: {e}", src.display())))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ActionError::failed(ACTION, format!("entry {i}: {e}")))?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| ActionError::failed(ACTION, format!("illegal file path: {}", entry.name())))?;
        let target = dst.join(relative);

        if entry.is_dir() {
            io::ensure_dir(&target)
                .map_err(|e| ActionError::io(ACTION, format!("creating {}", target.display()), e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            io::ensure_dir(parent)
                .map_err(|e| ActionError::io(ACTION, format!("creating {}", parent.display()), e))?;
        }
        let mut out = std::fs::File::create(&target)
            .map_err(|e| ActionError::io(ACTION, format!("creating {}", target.display()), e))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| ActionError::io(ACTION, format!("writing {}", target.display()), e))?;
    }
    Ok(archive.len())
}

#[async_trait]
impl Action for FileUnzip {
    fn validate(&self) -> Result<(), ActionError> {
        if self.config.src.is_empty() || self.config.dst.is_empty() {
            return Err(ActionError::invalid("file.unzip", "src and dst are required"));
        }
        Ok(())
    }

    async fn run(&self, _ctx: &ExecContext) -> Result<(), ActionError> {
        info!(src = %self.config.src, dst = %self.config.dst, "file.unzip");
        let src = PathBuf::from(&self.config.src);
        let dst = PathBuf::from(&self.config.dst);
        let entries = blocking("file.unzip", move || extract(&src, &dst)).await?;
        info!(entries, "file.unzip complete");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// file.download
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    pub url: String,
    pub dst: String,
}

#[derive(Debug)]
pub struct FileDownload {
    pub config: DownloadConfig,
}

fn build_download(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    Ok(Box::new(FileDownload {
        config: decode("file.download", value)?,
    }))
}

impl FileDownload {
    async fn fetch(&self) -> Result<Vec<u8>, ActionError> {
        const ACTION: &str = "file.download";
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| ActionError::failed(ACTION, e.to_string()))?;
        let response = client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| ActionError::failed(ACTION, format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ActionError::failed(ACTION, format!("bad status: {}", status.as_u16())));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ActionError::failed(ACTION, format!("reading body: {e}")))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Action for FileDownload {
    fn validate(&self) -> Result<(), ActionError> {
        if self.config.url.is_empty() || self.config.dst.is_empty() {
            return Err(ActionError::invalid("file.download", "url and dst are required"));
        }
        url::Url::parse(&self.config.url)
            .map_err(|e| ActionError::invalid("file.download", format!("invalid url '{}': {e}", self.config.url)))?;
        Ok(())
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        info!(url = %self.config.url, dst = %self.config.dst, "file.download");
        let body = ctx
            .cancel
            .run(self.fetch())
            .await
            .map_err(|cause| ActionError::Cancelled {
                action: "file.download".to_string(),
                cause,
            })??;
        let dst = PathBuf::from(&self.config.dst);
        let size = body.len();
        blocking("file.download", move || {
            io::atomic_write(&dst, &body)
                .map_err(|e| ActionError::io("file.download", format!("writing {}", dst.display()), e))
        })
        .await?;
        info!(bytes = size, "file.download complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn ctx() -> ExecContext {
        ExecContext::default()
    }

    fn build(name: &str, src: &str) -> Box<dyn Action> {
        let registry = ActionRegistry::with_builtins();
        let value: Value = serde_yaml::from_str(src).unwrap();
        (registry.get(name).unwrap())(&ctx(), &value).unwrap()
    }

    fn s(p: &Path) -> String {
        p.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn mkdir_shorthand_and_structured() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a/b");
        let b = dir.path().join("c");

        let short = build("file.mkdir", &format!("'{}'", s(&a)));
        short.validate().unwrap();
        short.run(&ctx()).await.unwrap();

        let long = build("file.mkdir", &format!("path: '{}'", s(&b)));
        long.run(&ctx()).await.unwrap();

        assert!(a.is_dir());
        assert!(b.is_dir());
    }

    #[test]
    fn mkdir_requires_path() {
        assert!(build("file.mkdir", "{}").validate().is_err());
        assert!(build("file.mkdir", "~").validate().is_err());
    }

    #[test]
    fn unknown_config_key_fails_construction() {
        let registry = ActionRegistry::with_builtins();
        let value: Value = serde_yaml::from_str("{path: /x, mode: 755}").unwrap();
        let err = (registry.get("file.mkdir").unwrap())(&ctx(), &value).err().unwrap();
        assert!(matches!(err, ActionError::Config { .. }));
    }

    #[tokio::test]
    async fn copy_file_creates_parent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("in.txt");
        let dst = dir.path().join("out/nested/in.txt");
        std::fs::write(&src, "payload").unwrap();

        let action = build("file.copy", &format!("{{src: '{}', dst: '{}'}}", s(&src), s(&dst)));
        action.validate().unwrap();
        action.run(&ctx()).await.unwrap();
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "payload");
    }

    #[tokio::test]
    async fn copy_directory_requires_dirs_flag() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("tree");
        std::fs::create_dir_all(src.join("x")).unwrap();
        std::fs::write(src.join("x/f.txt"), "f").unwrap();
        let dst = dir.path().join("copy");

        let refused = build("file.copy", &format!("{{src: '{}', dst: '{}'}}", s(&src), s(&dst)));
        assert!(refused.run(&ctx()).await.is_err());

        let allowed = build(
            "file.copy",
            &format!("{{src: '{}', dst: '{}', dirs: true}}", s(&src), s(&dst)),
        );
        allowed.run(&ctx()).await.unwrap();
        assert_eq!(std::fs::read_to_string(dst.join("x/f.txt")).unwrap(), "f");
    }

    #[tokio::test]
    async fn copy_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let action = build(
            "file.copy",
            &format!("{{src: '{}', dst: '{}'}}", s(&dir.path().join("nope")), s(&dir.path().join("o"))),
        );
        assert!(matches!(action.run(&ctx()).await, Err(ActionError::Io { .. })));
    }

    #[test]
    fn copy_requires_both_paths() {
        assert!(build("file.copy", "{src: a}").validate().is_err());
        assert!(build("file.copy", "{dst: b}").validate().is_err());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("gone");
        std::fs::create_dir_all(target.join("inner")).unwrap();
        let action = build("file.remove", &format!("'{}'", s(&target)));
        action.run(&ctx()).await.unwrap();
        action.run(&ctx()).await.unwrap();
        assert!(!target.exists());
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn unzip_extracts_nested_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("top.txt", "1"), ("sub/inner.txt", "2")]);
        let dst = dir.path().join("out");

        let action = build("file.unzip", &format!("{{src: '{}', dst: '{}'}}", s(&archive), s(&dst)));
        action.run(&ctx()).await.unwrap();
        assert_eq!(std::fs::read_to_string(dst.join("top.txt")).unwrap(), "1");
        assert_eq!(std::fs::read_to_string(dst.join("sub/inner.txt")).unwrap(), "2");
    }

    #[tokio::test]
    async fn unzip_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../escape.txt", "x")]);
        let dst = dir.path().join("out");

        let action = build("file.unzip", &format!("{{src: '{}', dst: '{}'}}", s(&archive), s(&dst)));
        let err = action.run(&ctx()).await.unwrap_err();
        assert!(err.to_string().contains("illegal file path"), "{err}");
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn download_validates_url() {
        assert!(build("file.download", "{url: 'not a url', dst: /tmp/x}").validate().is_err());
        assert!(build("file.download", "{url: 'https://example.com/a', dst: /tmp/x}")
            .validate()
            .is_ok());
        assert!(build("file.download", "{url: 'https://example.com/a'}").validate().is_err());
    }

    #[tokio::test]
    async fn download_writes_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/agent.msi")
            .with_status(200)
            .with_body("binary")
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("dl/agent.msi");

        let action = build(
            "file.download",
            &format!("{{url: '{}/agent.msi', dst: '{}'}}", server.url(), s(&dst)),
        );
        action.run(&ctx()).await.unwrap();
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "binary");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn download_bad_status_fails() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/missing").with_status(404).create_async().await;
        let dir = TempDir::new().unwrap();
        let action = build(
            "file.download",
            &format!("{{url: '{}/missing', dst: '{}'}}", server.url(), s(&dir.path().join("f"))),
        );
        let err = action.run(&ctx()).await.unwrap_err();
        assert!(err.to_string().contains("bad status: 404"), "{err}");
    }
}
