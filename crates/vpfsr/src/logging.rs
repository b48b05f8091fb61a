//! `tracing` setup for a DLL with no console.
//!
//! Lines go to the debugger channel (DebugView, an attached debugger) on
//! Windows and to stderr elsewhere. Nothing is written to disk.

use std::io::{self, Write};

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Filter directives, same syntax as `RUST_LOG`.
pub const LOG_ENV: &str = "VPFSR_LOG";
pub const DEFAULT_FILTER: &str = "vpfsr=info";

static INSTALLED: OnceCell<bool> = OnceCell::new();

/// Install the global subscriber. Returns whether ours is the one in place:
/// false if the host already installed a subscriber of its own. Only the
/// first call does any work.
pub fn init() -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_thread_names(true)
            .with_writer(DebugOutput)
            .try_init()
            .is_ok()
    })
}

/// Hands each formatted event to [`EventBuffer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugOutput;

impl<'a> MakeWriter<'a> for DebugOutput {
    type Writer = EventBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        EventBuffer::default()
    }
}

/// Collects one event and emits it as a single message when dropped, so
/// concurrent events never interleave mid-line.
#[derive(Debug, Default)]
pub struct EventBuffer {
    line: Vec<u8>,
}

impl EventBuffer {
    pub fn contents(&self) -> &[u8] {
        &self.line
    }

    fn emit(&mut self) {
        if self.line.is_empty() {
            return;
        }
        emit_line(&mut self.line);
        self.line.clear();
    }
}

impl Write for EventBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.line.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit();
        Ok(())
    }
}

impl Drop for EventBuffer {
    fn drop(&mut self) {
        self.emit();
    }
}

#[cfg(target_os = "windows")]
fn emit_line(line: &mut Vec<u8>) {
    use windows::core::PCSTR;
    use windows::Win32::System::Diagnostics::Debug::OutputDebugStringA;

    line.retain(|&b| b != 0);
    line.push(0);
    unsafe { OutputDebugStringA(PCSTR(line.as_ptr())) };
}

#[cfg(not(target_os = "windows"))]
fn emit_line(line: &mut Vec<u8>) {
    let _ = io::stderr().write_all(line);
}
