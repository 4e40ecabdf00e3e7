// src/utils/log.rs

//! Run-report helpers on top of the `log` facade.
//!
//! Headers, steps and summaries share one layout so run boundaries stand
//! out in the log stream.

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(60);
    log::info!("{}", border);
    log::info!("  {}", title);
    log::info!("{}", border);
}

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    log::info!("{}", format_step(step_num, total, message));
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    for line in format_summary(title, items) {
        log::info!("{}", line);
    }
}

fn format_step(step_num: usize, total: usize, message: &str) -> String {
    format!("[STEP {}/{}] {}", step_num, total, message)
}

fn format_summary(title: &str, items: &[(&str, String)]) -> Vec<String> {
    let mut lines = vec![format!("[SUMMARY] {}", title)];
    lines.extend(items.iter().map(|(key, value)| format!("    {}: {}", key, value)));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_step() {
        assert_eq!(format_step(2, 5, "Filter"), "[STEP 2/5] Filter");
    }

    #[test]
    fn test_format_summary() {
        let lines = format_summary("Run", &[("Pages", "3".to_string())]);
        assert_eq!(lines, vec!["[SUMMARY] Run", "    Pages: 3"]);
    }
}
