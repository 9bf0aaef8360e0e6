/// The `Default` impl for `bool` is `false`.
/// This function covers the `true` case.
pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_host() -> String {
    "127.0.0.1".to_string()
}

pub(crate) fn default_port() -> String {
    "6925".to_string()
}

pub(crate) fn default_executable() -> String {
    "chromium".to_string()
}

/// Flags every browser instance is started with.
/// Callers can add their own flags, duplicates are removed.
pub(crate) fn default_baseline_args() -> Vec<String> {
    [
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-client-side-phishing-detection",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-hang-monitor",
        "--disable-popup-blocking",
        "--disable-prompt-on-repost",
        "--disable-sync",
        "--metrics-recording-only",
        "--no-first-run",
        "--no-default-browser-check",
        "--password-store=basic",
        "--use-mock-keychain",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// 5 minutes
pub(crate) fn default_idle_timeout() -> u64 {
    5 * 60 * 1000
}

/// 1 hour
pub(crate) fn default_max_age() -> u64 {
    60 * 60 * 1000
}

pub(crate) fn default_acquire_timeout() -> u64 {
    10 * 60 * 1000
}

pub(crate) fn default_launch_timeout() -> u64 {
    20 * 1000
}

pub(crate) fn default_proxy_listen() -> String {
    "127.0.0.1:8899".to_string()
}

pub(crate) fn default_connect_timeout() -> u64 {
    15 * 1000
}

pub(crate) fn default_max_retries() -> u32 {
    3
}

pub(crate) fn default_retry_backoff() -> u64 {
    2000
}

pub(crate) fn default_chain_delay() -> u64 {
    3000
}
