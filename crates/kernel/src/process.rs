use crate::error::{ErrorKind, Result};
use crate::{Extraction, Format, Kernel};
use async_trait::async_trait;
use exn::ResultExt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::instrument;

const EXECUTABLES: [&str; 2] = ["cadventory-kernel", "cadventory-kernel-brlcad"];
// Anything past this is almost certainly a stack trace nobody wants in a catalog.
const MAX_MESSAGE_LEN: usize = 512;
/// Stdout holds metadata plus a preview scene; a large mesh fits easily.
const MAX_OUTPUT_BYTES: u64 = 64 * 1024 * 1024;
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// Runs an external kernel executable once per file.
///
/// The executable is invoked as `<program> [args...] --format <format> <path>`
/// with stdin closed, and must follow this contract:
///
/// | Exit code | Meaning                                                        |
/// |-----------|----------------------------------------------------------------|
/// | `0`       | stdout holds a JSON [`Extraction`] (`{"metadata":…,"scene":…}`) |
/// | `2`       | the file is malformed; stderr explains why                     |
/// | `3`       | the file uses an unsupported feature; stderr explains which    |
/// | other     | the kernel crashed                                             |
///
/// The child process is killed if it outlives the deadline or writes more
/// than the output limit to stdout. Stderr beyond 64 KiB is discarded.
#[derive(Debug, Clone)]
pub struct ProcessKernel {
    program: PathBuf,
    args: Vec<String>,
    max_output: u64,
}

impl ProcessKernel {
    pub const EXIT_MALFORMED: i32 = 2;
    pub const EXIT_UNSUPPORTED: i32 = 3;

    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args, max_output: MAX_OUTPUT_BYTES }
    }

    /// Treat more than `bytes` on stdout as a crash (64 MiB by default).
    pub fn with_output_limit(mut self, bytes: u64) -> Self {
        self.max_output = bytes;
        self
    }

    /// Locate a kernel executable on `PATH`.
    pub fn discover() -> Result<Self> {
        for exe in EXECUTABLES {
            if let Ok(path) = which::which(exe) {
                tracing::info!(kernel = %path.display(), "Discovered external geometry kernel");
                return Ok(Self::new(path, Vec::new()));
            }
        }
        tracing::info!("External geometry kernel not found in PATH");
        exn::bail!(ErrorKind::KernelNotFound);
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn interpret(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Result<Extraction> {
        let message = || {
            let text = String::from_utf8_lossy(stderr);
            let text = text.trim();
            match text.char_indices().nth(MAX_MESSAGE_LEN) {
                Some((cut, _)) => format!("{}…", &text[..cut]),
                None if text.is_empty() => "no details given".to_string(),
                None => text.to_string(),
            }
        };
        match status.code() {
            Some(0) => serde_json::from_slice::<Extraction>(stdout)
                .or_raise(|| ErrorKind::KernelCrash("kernel produced unreadable output".to_string())),
            Some(Self::EXIT_MALFORMED) => exn::bail!(ErrorKind::Malformed(message())),
            Some(Self::EXIT_UNSUPPORTED) => exn::bail!(ErrorKind::UnsupportedFeature(message())),
            Some(code) => exn::bail!(ErrorKind::KernelCrash(format!("exited with code {code}: {}", message()))),
            None => exn::bail!(ErrorKind::KernelCrash(Self::describe_signal(status))),
        }
    }

    #[cfg(unix)]
    fn describe_signal(status: ExitStatus) -> String {
        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            Some(signal) => format!("terminated by signal {signal}"),
            None => "terminated abnormally".to_string(),
        }
    }

    #[cfg(not(unix))]
    fn describe_signal(_status: ExitStatus) -> String {
        "terminated abnormally".to_string()
    }
}

#[async_trait]
impl Kernel for ProcessKernel {
    fn name(&self) -> &str {
        "external"
    }

    #[instrument(skip(self), fields(kernel = %self.program.display()))]
    async fn parse(&self, path: &Path, format: Format, timeout: Duration) -> Result<Extraction> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--format")
            .arg(format.as_str())
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Every early return drops the child, which kills it.
            .kill_on_drop(true)
            .spawn()
            .or_raise(|| ErrorKind::KernelCrash(format!("could not launch {}", self.program.display())))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            exn::bail!(ErrorKind::KernelCrash("kernel output was not captured".to_string()));
        };
        let exchange = async {
            let (stdout, stderr) =
                tokio::try_join!(read_capped(stdout, self.max_output), read_truncated(stderr, MAX_STDERR_BYTES))?;
            let status = child.wait().await?;
            io::Result::Ok((status, stdout, stderr))
        };
        let (status, stdout, stderr) = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => exn::bail!(ErrorKind::KernelCrash(format!("kernel output unusable: {err}"))),
            Err(_elapsed) => {
                tracing::warn!(path = %path.display(), "Kernel exceeded deadline; killing it");
                exn::bail!(ErrorKind::Timeout(timeout));
            },
        };
        Self::interpret(status, &stdout, &stderr)
    }
}

/// Read `pipe` to the end, failing as soon as it holds more than `limit` bytes.
async fn read_capped(pipe: impl AsyncRead + Unpin, limit: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    pipe.take(limit.saturating_add(1)).read_to_end(&mut buf).await?;
    if buf.len() as u64 > limit {
        return Err(io::Error::new(io::ErrorKind::FileTooLarge, format!("more than {limit} bytes on stdout")));
    }
    Ok(buf)
}

/// Keep the first `limit` bytes of `pipe` and drain the rest, so the child
/// never blocks on a full pipe.
async fn read_truncated(mut pipe: impl AsyncRead + Unpin, limit: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    (&mut pipe).take(limit).read_to_end(&mut buf).await?;
    tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;
    Ok(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn shell(script: &str) -> ProcessKernel {
        // Trailing kernel arguments land in $0, $1, ... and are ignored.
        ProcessKernel::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_successful_output_is_parsed() {
        let kernel = shell(r#"printf '{"metadata":{"objects":2,"primitives":7,"vertices":9,"units":"inches"}}'"#);
        let extraction = kernel.parse(Path::new("model.g"), Format::BrlCad, TIMEOUT).await.unwrap();
        assert_eq!(extraction.metadata.objects, 2);
        assert_eq!(extraction.metadata.primitives, 7);
        assert_eq!(extraction.metadata.units, crate::Units::Inches);
        assert!(extraction.scene.is_empty());
    }

    #[tokio::test]
    async fn test_exit_codes_map_to_error_kinds() {
        let err = shell("echo 'bad header' >&2; exit 2").parse(Path::new("a.g"), Format::BrlCad, TIMEOUT).await;
        assert_eq!(*err.unwrap_err(), ErrorKind::Malformed("bad header".to_string()));

        let err = shell("echo 'NURBS trims' >&2; exit 3").parse(Path::new("a.g"), Format::BrlCad, TIMEOUT).await;
        assert_eq!(*err.unwrap_err(), ErrorKind::UnsupportedFeature("NURBS trims".to_string()));

        let err = shell("exit 70").parse(Path::new("a.g"), Format::BrlCad, TIMEOUT).await;
        assert!(matches!(&*err.unwrap_err(), ErrorKind::KernelCrash(msg) if msg.contains("70")));
    }

    #[tokio::test]
    async fn test_garbage_output_is_a_crash() {
        let err = shell("echo 'segfault incoming'").parse(Path::new("a.g"), Format::BrlCad, TIMEOUT).await;
        assert!(matches!(&*err.unwrap_err(), ErrorKind::KernelCrash(_)));
    }

    #[tokio::test]
    async fn test_killed_by_signal_is_a_crash() {
        let err = shell("kill -9 $$").parse(Path::new("a.g"), Format::BrlCad, TIMEOUT).await;
        assert!(matches!(&*err.unwrap_err(), ErrorKind::KernelCrash(msg) if msg.contains("signal 9")));
    }

    #[tokio::test]
    async fn test_hung_kernel_times_out() {
        let started = Instant::now();
        let timeout = Duration::from_millis(200);
        let err = shell("sleep 30").parse(Path::new("a.g"), Format::BrlCad, timeout).await;
        assert_eq!(*err.unwrap_err(), ErrorKind::Timeout(timeout));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_runaway_output_is_a_crash() {
        let started = Instant::now();
        let kernel = shell("yes 'still going'").with_output_limit(4096);
        let err = kernel.parse(Path::new("a.g"), Format::BrlCad, TIMEOUT).await;
        assert!(matches!(&*err.unwrap_err(), ErrorKind::KernelCrash(msg) if msg.contains("more than 4096 bytes")));
        assert!(started.elapsed() < TIMEOUT);
    }

    #[tokio::test]
    async fn test_long_stderr_is_cut_short() {
        let kernel = shell("yes 'bad header' | head -c 1000000 >&2; exit 2");
        let err = kernel.parse(Path::new("a.g"), Format::BrlCad, TIMEOUT).await;
        assert!(matches!(&*err.unwrap_err(), ErrorKind::Malformed(msg) if msg.ends_with('…')));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_crash() {
        let kernel = ProcessKernel::new("/definitely/not/a/kernel", Vec::new());
        let err = kernel.parse(Path::new("a.g"), Format::BrlCad, TIMEOUT).await;
        assert!(matches!(&*err.unwrap_err(), ErrorKind::KernelCrash(_)));
    }
}
