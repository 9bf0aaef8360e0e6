use crate::internal_prelude::*;

/// Processes can't be inspected on this platform. Browsers are only shut down gracefully.
pub fn process_exists(_pid: u32) -> bool {
    false
}

pub fn kill_process(pid: u32) -> std::io::Result<()> {
    warn!("Killing process {pid} by pid isn't supported on this platform.");
    Ok(())
}
