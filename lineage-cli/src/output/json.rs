//! JSON output formatting for machine-readable output.

use serde::Serialize;

/// JSON output formatter
pub struct JsonOutput;

impl JsonOutput {
    /// Pretty-printed JSON.
    pub fn format<T: Serialize + ?Sized>(data: &T) -> String {
        serde_json::to_string_pretty(data)
            .unwrap_or_else(|e| format!("{{\n  \"error\": \"{}\"\n}}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_json_format() {
        let data = TestData {
            name: "nodes".to_string(),
            value: 42,
        };
        let json = JsonOutput::format(&data);
        assert!(json.contains("\"name\": \"nodes\""));
        assert!(json.contains("\"value\": 42"));
    }
}
