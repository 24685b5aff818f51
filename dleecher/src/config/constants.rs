pub const DOWNLOAD_DIRECTORY: &str = "DOWNLOAD_DIRECTORY";
pub const CONNECT_SECONDS_TIMEOUT: &str = "CONNECT_SECONDS_TIMEOUT";
pub const PROGRESS_SECONDS_INTERVAL: &str = "PROGRESS_SECONDS_INTERVAL";

pub const SETTINGS: [&str; 3] = [
    DOWNLOAD_DIRECTORY,
    CONNECT_SECONDS_TIMEOUT,
    PROGRESS_SECONDS_INTERVAL,
];
