use std::time::Duration;

/// Formats a duration as `HH:MM:SS.mmm`; hours widen past 99.
pub fn duration_str(duration: Duration) -> String {
    let ms = duration.as_millis();
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let milliseconds = ms % 1000;

    format!("{hours:02}:{minutes:02}:{seconds:02}.{milliseconds:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(duration_str(Duration::from_millis(0)), "00:00:00.000");
        assert_eq!(duration_str(Duration::from_millis(3_723_045)), "01:02:03.045");
        assert_eq!(duration_str(Duration::from_secs(100 * 3600)), "100:00:00.000");
    }
}
