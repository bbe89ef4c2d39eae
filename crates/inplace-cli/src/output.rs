use comfy_table::Table;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;

use inplace_core::LocationRef;

/// Create a styled table for output
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table
}

/// Single-letter kind indicator: directory, file, or not yet downloaded.
pub fn format_kind(location: &LocationRef) -> &'static str {
    if location.is_dir() {
        "d"
    } else if location.is_placeholder() {
        "c"
    } else {
        "-"
    }
}

/// Name with a trailing slash for directories.
pub fn format_name(location: &LocationRef) -> String {
    if location.is_dir() {
        format!("{}/", location.display_name())
    } else {
        location.display_name().to_string()
    }
}
