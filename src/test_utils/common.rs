use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::KvNodeConfig;
use crate::SnapshotSink;

/// Config rooted in `dir`, listening on an ephemeral port
pub fn node_config(dir: &Path) -> KvNodeConfig {
    let mut config = KvNodeConfig::default();
    config.cluster.db_root_dir = dir.join("db");
    config.cluster.log_dir = dir.join("logs");
    config.gateway.listen_address = ([127, 0, 0, 1], 0).into();
    config
}

/// What a [`MemorySink`] saw
#[derive(Debug, Default, Clone)]
pub struct SinkState {
    pub bytes: Vec<u8>,
    pub closed: bool,
    pub cancelled: bool,
}

/// In-memory sink that shares its state with the test
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn bytes(&self) -> Vec<u8> {
        self.state.lock().bytes.clone()
    }
}

impl Write for MemorySink {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> std::io::Result<usize> {
        self.state.lock().bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SnapshotSink for MemorySink {
    fn id(&self) -> &str {
        "memory"
    }

    fn cancel(&mut self) -> std::io::Result<()> {
        let mut state = self.state.lock();
        state.cancelled = true;
        state.bytes.clear();
        Ok(())
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Sink whose writes always fail
#[derive(Debug, Default)]
pub struct FailingSink {
    pub cancelled: bool,
    pub closed: bool,
}

impl Write for FailingSink {
    fn write(
        &mut self,
        _buf: &[u8],
    ) -> std::io::Result<usize> {
        Err(std::io::Error::other("disk full"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SnapshotSink for FailingSink {
    fn id(&self) -> &str {
        "failing"
    }

    fn cancel(&mut self) -> std::io::Result<()> {
        self.cancelled = true;
        Ok(())
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.closed = true;
        Ok(())
    }
}
