//! A live connection to one filter instance.
//!
//! Two variants share the same wire codec: [`SubprocessWorker`] spawns an
//! executable and pipes its stdin/stdout, [`TcpWorker`] connects to a
//! container-hosted service over TCP. Neither variant interprets payloads —
//! that is the evaluator's job (see [`crate::processor`]).
//!
//! Workers are never shared across threads: each [`crate::processor`]
//! filter runner owns at most one, and teardown (subprocess:
//! close-stdin/term/wait/kill, TCP: shutdown/close) happens deterministically
//! when the worker is dropped.

use std::io::{BufReader, Write};
use std::net::TcpStream;
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use crate::codec::{ItemReader, ItemWriter};
use crate::error::EngineError;

const PROTOCOL_VERSION: &str = "1";
const TCP_CONNECT_RETRIES: u32 = 10;
const TCP_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);
const SUBPROCESS_TERM_GRACE: Duration = Duration::from_secs(1);

/// Operations common to every filter connection variant.
pub trait FilterWorker: Send {
    fn name(&self) -> &str;

    /// Reads and returns the next tag.
    fn next_tag(&mut self) -> std::io::Result<String>;
    fn get_item(&mut self) -> std::io::Result<Option<Vec<u8>>>;
    fn get_array(&mut self) -> std::io::Result<Vec<Vec<u8>>>;
    fn get_bool(&mut self) -> std::io::Result<bool>;
    fn get_dict(&mut self) -> std::io::Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn send_item(&mut self, value: Option<&[u8]>) -> std::io::Result<()>;
    fn send_array(&mut self, items: &[Vec<u8>]) -> std::io::Result<()>;
    fn send_dict(&mut self, entries: &[(Vec<u8>, Vec<u8>)]) -> std::io::Result<()>;

    fn send_bool(&mut self, value: bool) -> std::io::Result<()> {
        self.send_item(Some(if value { b"true" } else { b"false" }))
    }
}

fn send_handshake<W: Write>(
    writer: &mut ItemWriter<W>,
    name: &str,
    args: &[String],
    blob: &[u8],
) -> std::io::Result<()> {
    writer.write_item(Some(PROTOCOL_VERSION.as_bytes()))?;
    writer.write_item(Some(name.as_bytes()))?;
    writer.write_array(args.iter().map(|a| a.as_bytes()))?;
    writer.write_item(Some(blob))?;
    writer.flush()
}

// ── Subprocess variant ───────────────────────────────────────────────────────

/// A connection to a filter spawned as a child process.
pub struct SubprocessWorker {
    name: String,
    child: Child,
    reader: ItemReader<BufReader<ChildStdout>>,
    /// `None` only during teardown: [`Drop`] takes this out first so the
    /// child's stdin closes (and it can exit on EOF) before it is signalled.
    writer: Option<ItemWriter<ChildStdin>>,
}

impl SubprocessWorker {
    /// Spawns `code_path --filter` with the server's read/write pipes
    /// connected to its stdout/stdin, and performs the protocol handshake.
    pub fn spawn(
        code_path: &Path,
        name: &str,
        args: &[String],
        blob: &[u8],
    ) -> Result<Self, EngineError> {
        let mut cmd = Command::new(code_path);
        cmd.arg("--filter")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped());
        if let Ok(dir) = std::env::var("TMPDIR") {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|e| {
            EngineError::FilterExecution(format!(
                "unable to execute filter code {name}: {e}"
            ))
        })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let mut writer = ItemWriter::new(stdin);
        send_handshake(&mut writer, name, args, blob).map_err(|e| {
            EngineError::FilterExecution(format!("unable to initialize filter {name}: {e}"))
        })?;

        Ok(Self {
            name: name.to_string(),
            child,
            reader: ItemReader::new(BufReader::new(stdout)),
            writer: Some(writer),
        })
    }

    fn writer_mut(&mut self) -> &mut ItemWriter<ChildStdin> {
        self.writer.as_mut().expect("writer only absent during teardown")
    }
}

impl FilterWorker for SubprocessWorker {
    fn name(&self) -> &str {
        &self.name
    }
    fn next_tag(&mut self) -> std::io::Result<String> {
        self.reader.read_tag()
    }
    fn get_item(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        self.reader.read_item()
    }
    fn get_array(&mut self) -> std::io::Result<Vec<Vec<u8>>> {
        self.reader.read_array()
    }
    fn get_bool(&mut self) -> std::io::Result<bool> {
        self.reader.read_bool()
    }
    fn get_dict(&mut self) -> std::io::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.reader.read_dict()
    }
    fn send_item(&mut self, value: Option<&[u8]>) -> std::io::Result<()> {
        self.writer_mut().write_item(value)?;
        self.writer_mut().flush()
    }
    fn send_array(&mut self, items: &[Vec<u8>]) -> std::io::Result<()> {
        self.writer_mut().write_array(items.iter().map(|i| i.as_slice()))?;
        self.writer_mut().flush()
    }
    fn send_dict(&mut self, entries: &[(Vec<u8>, Vec<u8>)]) -> std::io::Result<()> {
        self.writer_mut()
            .write_dict(entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())))?;
        self.writer_mut().flush()
    }
}

impl Drop for SubprocessWorker {
    fn drop(&mut self) {
        // Gentle shutdown first: close stdin, then SIGTERM, then a grace
        // period before SIGKILL. Abnormal exits are logged, not propagated —
        // by the time we're here the caller has already decided to discard
        // this worker.
        drop(self.writer.take());

        let pid = self.child.id() as libc::pid_t;
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        std::thread::sleep(SUBPROCESS_TERM_GRACE);

        match self.child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    tracing::info!(filter = %self.name, ?status, "filter process exited abnormally");
                }
            }
            Ok(None) => {
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
            Err(e) => {
                tracing::warn!(filter = %self.name, error = %e, "failed to reap filter process");
            }
        }
    }
}

// ── TCP variant ───────────────────────────────────────────────────────────────

/// A connection to a filter hosted as a container service over TCP.
pub struct TcpWorker {
    name: String,
    stream: TcpStream,
    reader: ItemReader<BufReader<TcpStream>>,
    writer: ItemWriter<TcpStream>,
}

impl TcpWorker {
    /// Connects to `(host, port)`, retrying up to [`TCP_CONNECT_RETRIES`]
    /// times with a one-second sleep between attempts, then performs the
    /// protocol handshake.
    pub fn connect(
        host: &str,
        port: u16,
        name: &str,
        args: &[String],
        blob: &[u8],
    ) -> Result<Self, EngineError> {
        let mut last_err = None;
        let mut connected = None;
        for _ in 0..TCP_CONNECT_RETRIES {
            match TcpStream::connect((host, port)) {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                    std::thread::sleep(TCP_CONNECT_RETRY_DELAY);
                }
            }
        }
        let stream = connected.ok_or_else(|| {
            EngineError::FilterExecution(format!(
                "unable to connect to filter at {host}:{port}: {}",
                last_err.map(|e| e.to_string()).unwrap_or_default()
            ))
        })?;
        stream.set_nodelay(true).map_err(EngineError::Io)?;

        let reader_stream = stream.try_clone().map_err(EngineError::Io)?;
        let mut writer = ItemWriter::new(stream.try_clone().map_err(EngineError::Io)?);
        send_handshake(&mut writer, name, args, blob).map_err(|e| {
            EngineError::FilterExecution(format!("unable to initialize filter {name}: {e}"))
        })?;

        Ok(Self {
            name: name.to_string(),
            stream,
            reader: ItemReader::new(BufReader::new(reader_stream)),
            writer,
        })
    }
}

impl FilterWorker for TcpWorker {
    fn name(&self) -> &str {
        &self.name
    }
    fn next_tag(&mut self) -> std::io::Result<String> {
        self.reader.read_tag()
    }
    fn get_item(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        self.reader.read_item()
    }
    fn get_array(&mut self) -> std::io::Result<Vec<Vec<u8>>> {
        self.reader.read_array()
    }
    fn get_bool(&mut self) -> std::io::Result<bool> {
        self.reader.read_bool()
    }
    fn get_dict(&mut self) -> std::io::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.reader.read_dict()
    }
    fn send_item(&mut self, value: Option<&[u8]>) -> std::io::Result<()> {
        self.writer.write_item(value)?;
        self.writer.flush()
    }
    fn send_array(&mut self, items: &[Vec<u8>]) -> std::io::Result<()> {
        self.writer.write_array(items.iter().map(|i| i.as_slice()))?;
        self.writer.flush()
    }
    fn send_dict(&mut self, entries: &[(Vec<u8>, Vec<u8>)]) -> std::io::Result<()> {
        self.writer
            .write_dict(entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())))?;
        self.writer.flush()
    }
}

impl Drop for TcpWorker {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
