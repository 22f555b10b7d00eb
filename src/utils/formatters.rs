use std::time::Duration;

/// Converts bytes to human-readable file size format
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Throughput in MiB per second. Elapsed time is floored at 100 ms so a
/// tiny file does not report an absurd rate.
pub fn speed_mib_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(0.1);
    bytes as f64 / (1024.0 * 1024.0) / secs
}

/// Speed label shown next to the progress bar, e.g. `"12.3 MB/s"`.
pub fn format_speed(mib_per_sec: f64) -> String {
    format!("{:.1} MB/s", mib_per_sec)
}

pub fn format_latency(latency: Duration) -> String {
    format!("{} ms", latency.as_millis())
}

/// Countdown readout: `"0:30"`, `"1:05"`.
pub fn format_countdown(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Truncates filename to max length (in characters) with ellipsis
pub fn truncate_filename(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        name.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let head: String = name.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

/// Text-mode progress bar: `[#####.....]`.
pub fn progress_bar(percent: u8, width: usize) -> String {
    let filled = (percent.min(100) as usize * width) / 100;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.00 KB");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(1048576), "1.00 MB");
        assert_eq!(format_file_size(1073741824), "1.00 GB");
    }

    #[test]
    fn test_speed_floors_elapsed_time() {
        let one_mib = 1024 * 1024;
        assert_eq!(speed_mib_per_sec(one_mib, Duration::from_secs(2)), 0.5);
        assert_eq!(speed_mib_per_sec(one_mib, Duration::ZERO), 10.0);
        assert_eq!(format_speed(12.345), "12.3 MB/s");
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(Duration::from_secs(30)), "0:30");
        assert_eq!(format_countdown(Duration::from_secs(65)), "1:05");
    }

    #[test]
    fn test_truncate_filename() {
        assert_eq!(truncate_filename("short.txt", 20), "short.txt");
        assert_eq!(truncate_filename("verylongfilename.txt", 10), "verylon...");
        assert_eq!(truncate_filename("test", 2), "...");
        assert_eq!(truncate_filename("ééééééé.txt", 6), "ééé...");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0, 4), "[....]");
        assert_eq!(progress_bar(50, 4), "[##..]");
        assert_eq!(progress_bar(120, 4), "[####]");
    }
}
