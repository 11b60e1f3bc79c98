use std::time::Duration;

/// One rounded component in s, ms or us.
pub(crate) fn format_duration_single(d: Duration) -> String {
    let total_us = d.as_micros();

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    if total_us >= 1_000_000 {
        return format!("{}s", round_div(total_us, 1_000_000));
    }
    if total_us >= 1_000 {
        return format!("{}ms", round_div(total_us, 1_000));
    }
    format!("{total_us}us")
}

pub(crate) fn format_bytes(b: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    if b >= GIB {
        return format!("{:.2}GiB", (b as f64) / (GIB as f64));
    }
    if b >= MIB {
        return format!("{:.2}MiB", (b as f64) / (MIB as f64));
    }
    if b >= KIB {
        return format!("{:.2}KiB", (b as f64) / (KIB as f64));
    }

    format!("{b}B")
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_ms_opt(v: Option<f64>) -> String {
    match v {
        Some(ms) if ms >= 1000.0 => format!("{:.2}s", ms / 1000.0),
        Some(ms) if ms >= 1.0 => format!("{ms:.2}ms"),
        Some(ms) => format!("{:.0}us", ms * 1000.0),
        None => "-".to_string(),
    }
}

pub(crate) fn format_percent(num: u64, den: u64) -> String {
    if den == 0 {
        return "-".to_string();
    }
    format!("{:.2}%", (num as f64) * 100.0 / (den as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_render_as_one_component() {
        assert_eq!(format_duration_single(Duration::from_millis(1499)), "1s");
        assert_eq!(format_duration_single(Duration::from_millis(1500)), "2s");
        assert_eq!(format_duration_single(Duration::from_micros(2500)), "3ms");
        assert_eq!(format_duration_single(Duration::from_micros(7)), "7us");
    }

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.00KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00MiB");
    }

    #[test]
    fn milliseconds_pick_a_readable_unit() {
        assert_eq!(format_ms_opt(None), "-");
        assert_eq!(format_ms_opt(Some(0.25)), "250us");
        assert_eq!(format_ms_opt(Some(12.5)), "12.50ms");
        assert_eq!(format_ms_opt(Some(1500.0)), "1.50s");
    }

    #[test]
    fn percent_of_zero_is_dash() {
        assert_eq!(format_percent(1, 0), "-");
        assert_eq!(format_percent(1, 4), "25.00%");
    }
}
