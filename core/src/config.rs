//! Construction-time settings for `Transport`.

use serde::Deserialize;

use crate::body::DEFAULT_CHUNK_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Fail with `ProtocolAnomaly` when the engine's final host differs from
    /// the requested one, which usually means a captive portal answered.
    pub throw_on_captive_network: bool,
    /// Chunk size for copying request bodies into the engine.
    pub copy_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            throw_on_captive_network: false,
            copy_buffer_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn captive_network_checks(mut self, enabled: bool) -> Self {
        self.throw_on_captive_network = enabled;
        self
    }

    pub fn copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size.max(1);
        self
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.copy_buffer_size.max(1)
    }
}
