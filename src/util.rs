use std::path::PathBuf;

const DEFAULT_PORT: u16 = 5201;

/// Default iperf3 server port
pub fn get_default_port() -> u16 {
    DEFAULT_PORT
}

const THROUGHPUT_DB: &str = "THROUGHPUT_DB";

const DEFAULT_DB: &str = "./throughput.db";

pub fn get_default_database_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB)
}

/// Database path override from the environment
pub fn get_database_path() -> Option<PathBuf> {
    std::env::var(THROUGHPUT_DB).ok().map(PathBuf::from)
}

const IPERF3_BIN: &str = "IPERF3_BIN";

const DEFAULT_BIN: &str = "iperf3";

pub fn get_default_probe_binary() -> PathBuf {
    PathBuf::from(DEFAULT_BIN)
}

/// Probe binary override from the environment
pub fn get_probe_binary() -> Option<PathBuf> {
    std::env::var(IPERF3_BIN).ok().map(PathBuf::from)
}

/// Current wall-clock time in seconds since the epoch
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
