use chanmux_rpc::RpcConfig;

/// Default read size for I/O pump threads.
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// Per-channel settings fixed at creation.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Accumulate stdout until the stream ends instead of delivering each
    /// chunk as it arrives.
    pub stdout_buffered: bool,
    /// Same for stderr.
    pub stderr_buffered: bool,
    /// Carry the RPC protocol on the input/output streams.
    pub rpc: bool,
    /// Largest chunk a pump thread reads at once.
    pub read_chunk_size: usize,
    pub rpc_config: RpcConfig,
}

impl ChannelOptions {
    /// Options for an RPC-capable channel.
    pub fn rpc() -> Self {
        Self {
            rpc: true,
            ..Self::default()
        }
    }

    /// Options for a byte channel with both outputs buffered.
    pub fn buffered() -> Self {
        Self {
            stdout_buffered: true,
            stderr_buffered: true,
            ..Self::default()
        }
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            stdout_buffered: false,
            stderr_buffered: false,
            rpc: false,
            read_chunk_size: DEFAULT_READ_CHUNK,
            rpc_config: RpcConfig::default(),
        }
    }
}
