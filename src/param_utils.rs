use std::collections::HashMap;

/// Extract a parameter as f64 with a default value
pub fn get_param(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Extract a parameter as usize with a default value
pub fn get_param_usize(params: &HashMap<String, f64>, key: &str, default: usize) -> usize {
    params.get(key).map(|&v| v as usize).unwrap_or(default)
}

/// Extract a parameter as usize with a minimum value
pub fn get_param_usize_at_least(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .unwrap_or(default as f64)
        .max(min as f64) as usize
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_clamped(
    params: &HashMap<String, f64>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = params.get(key).copied().unwrap_or(default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}
