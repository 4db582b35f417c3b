use std::io::Write;

/// Write a line to stdout
pub fn write_line(line: &str) -> Result<(), String> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(line.as_bytes())
        .and_then(|_| handle.write_all(b"\n"))
        .and_then(|_| handle.flush())
        .map_err(|e| format!("Failed to write to stdout: {}", e))
}

/// Serialize a value to JSON (pretty or compact).
pub fn to_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<String, String> {
    if compact {
        serde_json::to_string(value).map_err(|e| format!("JSON serialization failed: {}", e))
    } else {
        serde_json::to_string_pretty(value)
            .map_err(|e| format!("JSON serialization failed: {}", e))
    }
}

/// Serialize and print, returning an error message on failure
pub fn print_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<(), String> {
    to_json(value, compact).and_then(|json| write_line(&json))
}
