//! Duration flags: `humantime` spans (`500ms`, `8s`, `1m30s`), plus bare
//! numbers read as seconds.

use std::time::Duration;

pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).map_err(|e| format!("{input:?}: {e}"));
    }
    humantime::parse_duration(s).map_err(|e| format!("{input:?}: {e}"))
}
