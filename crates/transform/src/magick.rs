use crate::error::{ErrorKind, Result};
use crate::{BoxAsyncRead, TransformRequest, TransformStream, Transformer};
use async_stream::stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::{Instant, timeout_at};

/// Size of each chunk read from the engine's stdout.
const CHUNK_SIZE: usize = 64 * 1024;
/// How much of the engine's stderr ends up in logs.
const STDERR_LOG_LIMIT: usize = 2048;

/// Represents an installed ImageMagick/GraphicsMagick executable.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Program {
    /// ImageMagick 7 (`magick`).
    Magick(PathBuf),
    /// ImageMagick 6 (`convert`).
    Convert(PathBuf),
    /// GraphicsMagick (`gm convert`).
    GraphicsMagick(PathBuf),
}
impl Program {
    fn discover() -> Result<Self> {
        // TODO: Windows ships a `convert.exe` that converts filesystems, not images.
        let candidates: [(&str, fn(PathBuf) -> Self); 3] =
            [("magick", Self::Magick), ("convert", Self::Convert), ("gm", Self::GraphicsMagick)];
        for (exe, program) in candidates {
            if let Ok(path) = which::which(exe) {
                tracing::trace!(path = %path.display(), "Discovered image engine");
                return Ok(program(path));
            }
        }
        tracing::info!("ImageMagick/GraphicsMagick executable not found in PATH");
        exn::bail!(ErrorKind::EngineNotFound);
    }

    fn executable(&self) -> &Path {
        match self {
            Self::Magick(path) | Self::Convert(path) | Self::GraphicsMagick(path) => path,
        }
    }

    /// `<engine> - -resize WxH -quality Q jpg:-`: read any format on stdin,
    /// write JPEG to stdout.
    fn command(&self, request: &TransformRequest) -> Command {
        let mut command = Command::new(self.executable());
        if matches!(self, Self::GraphicsMagick(_)) {
            command.arg("convert");
        }
        command
            .arg("-")
            .args(["-resize", &request.dimensions.to_string()])
            .args(["-quality", &request.quality.to_string()])
            .arg("jpg:-");
        command
    }
}

/// Transforms images by piping them through an ImageMagick or GraphicsMagick
/// child process.
///
/// The process is killed when the transform times out or when the returned
/// stream is dropped before completion, so an abandoned request never leaves
/// an orphaned engine behind.
#[derive(Debug, Clone)]
pub struct MagickTransformer {
    program: Program,
}
impl MagickTransformer {
    /// Look for `magick`, `convert` and `gm` in `PATH`, in that order.
    pub fn discover() -> Result<Self> {
        Ok(Self { program: Program::discover()? })
    }

    /// Use a specific ImageMagick executable (`magick` or `convert` style).
    pub fn with_executable(path: impl Into<PathBuf>) -> Self {
        Self { program: Program::Convert(path.into()) }
    }

    pub fn executable(&self) -> &Path {
        self.program.executable()
    }

    fn spawn(&self, request: &TransformRequest) -> Result<Child> {
        self.program
            .command(request)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .or_raise(|| ErrorKind::Spawn)
    }
}

#[async_trait]
impl Transformer for MagickTransformer {
    fn name(&self) -> &str {
        match self.program {
            Program::Magick(_) | Program::Convert(_) => "imagemagick",
            Program::GraphicsMagick(_) => "graphicsmagick",
        }
    }

    async fn transform(&self, mut source: BoxAsyncRead, request: TransformRequest) -> Result<TransformStream> {
        let deadline = Instant::now() + request.timeout;
        let mut child = self.spawn(&request)?;
        let mut stdin = child.stdin.take().ok_or_raise(|| ErrorKind::Spawn)?;
        let mut stdout = child.stdout.take().ok_or_raise(|| ErrorKind::Spawn)?;
        let mut stderr = child.stderr.take().ok_or_raise(|| ErrorKind::Spawn)?;

        // Feed stdin and drain stderr on their own tasks: the engine may not
        // read all of its input before it starts writing output, and a full
        // stderr pipe would stall it.
        let feeder = tokio::spawn(async move {
            let copied = tokio::io::copy(&mut source, &mut stdin).await;
            // Closing stdin tells the engine the input is complete.
            drop(stdin);
            copied
        });
        let diagnostics = tokio::spawn(async move {
            let mut buffer = Vec::new();
            _ = stderr.read_to_end(&mut buffer).await;
            buffer
        });

        let engine = self.name().to_string();
        Ok(Box::pin(stream! {
            let mut child = child;
            let mut buffer = vec![0; CHUNK_SIZE];
            let mut produced: u64 = 0;
            'output: loop {
                match timeout_at(deadline, stdout.read(&mut buffer)).await {
                    Ok(Ok(0)) => break 'output,
                    Ok(Ok(n)) => {
                        produced += n as u64;
                        yield Ok(buffer[..n].to_vec());
                    },
                    Ok(Err(e)) => {
                        yield Err(e).or_raise(|| ErrorKind::Io);
                        return;
                    },
                    Err(_) => {
                        yield Err(kill(&mut child, &engine).await);
                        return;
                    },
                }
            }

            let status = match timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    yield Err(e).or_raise(|| ErrorKind::Io);
                    return;
                },
                Err(_) => {
                    yield Err(kill(&mut child, &engine).await);
                    return;
                },
            };
            let stderr = diagnostics.await.unwrap_or_default();
            if let Some(kind) = failure(status) {
                let stderr = String::from_utf8_lossy(&stderr[..stderr.len().min(STDERR_LOG_LIMIT)]).into_owned();
                tracing::warn!(engine = %engine, %status, stderr = %stderr.trim(), "Transform engine failed");
                yield Err(exn::Exn::from(kind));
                return;
            }
            // A broken pipe only means the engine stopped reading early, which
            // its exit status already vouched for. Anything else means the
            // engine saw truncated input.
            match feeder.await {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    yield Err(e).or_raise(|| ErrorKind::Io);
                    return;
                },
                Err(e) => {
                    yield Err(e).or_raise(|| ErrorKind::Io);
                    return;
                },
                _ => {},
            }
            if produced == 0 {
                yield Err(exn::Exn::from(ErrorKind::EmptyOutput));
                return;
            }
            tracing::trace!(engine = %engine, bytes = produced, "Transform engine finished");
        }))
    }
}

async fn kill(child: &mut Child, engine: &str) -> crate::error::Error {
    tracing::warn!(engine = %engine, "Transform timed out; killing engine");
    _ = child.kill().await;
    exn::Exn::from(ErrorKind::Timeout)
}

fn failure(status: ExitStatus) -> Option<ErrorKind> {
    if status.success() {
        return None;
    }
    Some(match status.code() {
        Some(code) => ErrorKind::Failed(code),
        None => ErrorKind::Killed,
    })
}
