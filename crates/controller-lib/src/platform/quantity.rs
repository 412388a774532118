//! Kubernetes quantity parsing and formatting
//!
//! CPU quantities are handled in millicores, memory quantities in bytes.

/// Binary and decimal memory suffixes, longest first so `Mi` wins over `M`
const MEMORY_UNITS: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("k", 1e3),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
];

/// Parse a CPU quantity (`250m`, `1`, `0.5`, `1500000n`, `300u`) into millicores
pub fn parse_cpu_millicores(quantity: &str) -> Option<f64> {
    let q = quantity.trim();
    let value = if let Some(v) = q.strip_suffix('n') {
        v.parse::<f64>().ok()? / 1e6
    } else if let Some(v) = q.strip_suffix('u') {
        v.parse::<f64>().ok()? / 1e3
    } else if let Some(v) = q.strip_suffix('m') {
        v.parse::<f64>().ok()?
    } else {
        q.parse::<f64>().ok()? * 1000.0
    };
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Parse a memory quantity (`256Mi`, `1Gi`, `128974848`, `129M`) into bytes
pub fn parse_memory_bytes(quantity: &str) -> Option<f64> {
    let q = quantity.trim();
    let value = MEMORY_UNITS
        .iter()
        .find_map(|(unit, factor)| {
            q.strip_suffix(unit)
                .and_then(|v| v.parse::<f64>().ok())
                .map(|v| v * factor)
        })
        .or_else(|| q.parse::<f64>().ok())?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

pub fn format_cpu(millicores: u64) -> String {
    format!("{}m", millicores)
}

/// Format bytes as `Mi` when evenly divisible, plain bytes otherwise
pub fn format_memory(bytes: u64) -> String {
    const MI: u64 = 1024 * 1024;
    if bytes % MI == 0 {
        format!("{}Mi", bytes / MI)
    } else {
        bytes.to_string()
    }
}
