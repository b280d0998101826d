// src/utils/report.rs

//! Multi-line progress output on top of the `log` facade.
//!
//! Headers, step banners and summary blocks used by the pipeline stages.

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    log::info!("[STEP {}/{}] {}", step_num, total, message);
}

/// Log a separator line
pub fn separator() {
    log::info!("{}", "─".repeat(60));
}

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(60);
    log::info!("{}", border);
    log::info!("  {}", title);
    log::info!("{}", border);
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    log::info!("    {}", message);
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    log::info!("[SUMMARY] {}", title);
    for (key, value) in items {
        log::info!("    {}: {}", key, value);
    }
}

/// Format a byte count for humans, e.g. `1.5 MiB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
