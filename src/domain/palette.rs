// Shared colour palettes for sensor traces and segment overlays

pub const SENSOR_COLORS: [&str; 10] = [
    "#3b82f6", "#ef4444", "#10b981", "#f59e0b", "#8b5cf6", "#f97316", "#06b6d4", "#84cc16",
    "#ec4899", "#6366f1",
];

/// Blue, red, green, orange, purple, pink.
pub const SEGMENT_COLORS: [&str; 6] = [
    "#3b82f6", "#ef4444", "#10b981", "#f59e0b", "#8b5cf6", "#ec4899",
];

pub const SEGMENT_FILL_ALPHA: f32 = 0.10;
pub const SEGMENT_BORDER_ALPHA: f32 = 0.7;
pub const RANGE_FILL_ALPHA: f32 = 0.15;

/// Converts `#rrggbb` to an `rgba(...)` string. Anything else is returned unchanged.
pub fn hex_to_rgba(hex: &str, alpha: f32) -> String {
    let digits = match hex.strip_prefix('#') {
        Some(d) if d.len() == 6 && d.is_ascii() => d,
        _ => return hex.to_string(),
    };
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16);
    match (channel(0..2), channel(2..4), channel(4..6)) {
        (Ok(r), Ok(g), Ok(b)) => format!("rgba({}, {}, {}, {})", r, g, b, alpha),
        _ => hex.to_string(),
    }
}
