//! Simulated address space for tests

use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::MemoryAccessor;
use crate::error::{Error, Result};

/// Callback run before every write, outside of the mock's own locks
type WriteHook = Arc<dyn Fn(usize) + Send + Sync>;

/// State shared by every clone of a [`MockMemory`]
#[derive(Default)]
struct Inner {
    /// Bytes that have been set, by address
    bytes: Mutex<HashMap<usize, u8>>,
    /// Ranges whose access fails
    faults: Mutex<Vec<Range<usize>>>,
    /// Ranges whose writes are dropped
    ignored: Mutex<Vec<Range<usize>>>,
    /// Callback run before each write
    hook: Mutex<Option<WriteHook>>,
    /// Writes that reached memory
    writes: AtomicUsize,
}

/// Sparse byte-addressed memory. Unset bytes read as zero.
#[derive(Clone, Default)]
pub struct MockMemory {
    inner: Arc<Inner>,
}

impl MockMemory {
    /// Creates an empty address space
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets bytes directly, bypassing faults and hooks
    pub fn fill(&self, address: usize, bytes: &[u8]) {
        let mut map = self.inner.bytes.lock().unwrap();
        for (i, b) in bytes.iter().enumerate() {
            map.insert(address + i, *b);
        }
    }

    /// Reads `len` bytes, bypassing faults
    pub fn bytes(&self, address: usize, len: usize) -> Vec<u8> {
        let map = self.inner.bytes.lock().unwrap();
        (address..address + len)
            .map(|a| map.get(&a).copied().unwrap_or(0))
            .collect()
    }

    /// Any access touching `range` fails with an access violation
    pub fn fault(&self, range: Range<usize>) {
        self.inner.faults.lock().unwrap().push(range);
    }

    /// Writes to `range` succeed but don't change anything
    pub fn ignore_writes(&self, range: Range<usize>) {
        self.inner.ignored.lock().unwrap().push(range);
    }

    /// Runs `hook` with the address of every write, before the bytes land
    pub fn on_write(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.inner.hook.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Number of writes that reached memory
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Fails if any fault covers the access
    fn check(&self, address: usize, len: usize) -> Result<()> {
        let faults = self.inner.faults.lock().unwrap();
        if faults
            .iter()
            .any(|f| f.start < address + len && address < f.end)
        {
            return Err(Error::AccessViolation {
                address,
                len,
                cause: None,
            });
        }
        Ok(())
    }
}

unsafe impl MemoryAccessor for MockMemory {
    unsafe fn read(&self, address: usize, buf: &mut [u8]) -> Result<()> {
        self.check(address, buf.len())?;
        buf.copy_from_slice(&self.bytes(address, buf.len()));
        Ok(())
    }

    unsafe fn write(&self, address: usize, bytes: &[u8]) -> Result<()> {
        self.check(address, bytes.len())?;

        let hook = self.inner.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(address);
        }

        let ignored = self.inner.ignored.lock().unwrap().clone();
        let mut map = self.inner.bytes.lock().unwrap();
        for (i, b) in bytes.iter().enumerate() {
            let a = address + i;
            if !ignored.iter().any(|r| r.contains(&a)) {
                map.insert(a, *b);
            }
        }
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Routes engine logs to the test output
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory sink for formatted log lines
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with every event on this thread formatted into the returned string
pub fn capture_logs(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}
