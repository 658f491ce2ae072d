//! Shared protocol constants for the ferry line transport

// Field separator inside a control line. Filenames containing it are rejected.
pub const SEPARATOR: &str = "<|>";

// Control lines end with a single newline; chunk payloads are never
// newline-delimited, their length comes from FILE_INFO.
pub const TERMINATOR: u8 = b'\n';

// Chunk size in bytes. Fixed on both ends, never negotiated.
pub const CHUNK_SIZE: usize = 1024 * 1024;

// Maximum control line length (terminator included). Longer lines are a
// protocol violation.
pub const MAX_LINE_LEN: usize = 4096;

// Delimiter between names in the LIST payload
pub const LIST_DELIMITER: char = ',';

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 65432;

// Command verbs (client -> server)
pub mod command {
    pub const LIST: &str = "LIST";
    pub const DOWNLOAD: &str = "DOWNLOAD";
    pub const QUIT: &str = "QUIT";
}

// Response status codes (server -> client)
pub mod response {
    pub const OK: &str = "OK";
    pub const ERROR: &str = "ERROR";
    pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
    pub const FILE_INFO: &str = "FILE_INFO";
}

// Centralized timeout constants shared by server and client
pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // Per-read timeout while waiting for a control line or chunk bytes (ms)
    pub const READ_MS: u64 = 30_000;

    // How long close() waits for the QUIT acknowledgement (ms)
    pub const QUIT_ACK_MS: u64 = 1_000;

    // Base timeout for writes (ms)
    pub const WRITE_BASE_MS: u64 = 5_000;

    // Additional write timeout per MB of payload (ms)
    pub const PER_MB_MS: u64 = 1_000;

    // 5s base + 1s per 1MB payload (ceil)
    pub fn write_deadline_ms(payload_len: usize) -> u64 {
        let mb = (payload_len as u64 + 1_048_575) / 1_048_576;
        WRITE_BASE_MS + mb * PER_MB_MS
    }
}
