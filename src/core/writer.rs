//! Variable writer: pushes a resolved schema into the macro's variables.
//!
//! One `SET_GCODE_VARIABLE` script is issued per schema field. Writes are
//! independent; a failed field is logged and the next reconciliation will
//! overwrite it anyway. If the macro itself is missing, the writer warns once
//! and turns into a no-op for the rest of the process lifetime.
//!
//! Each script is bounded by a timeout; a script that times out counts as a
//! failed field.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::adapters::{GcodeError, GcodeSink};
use crate::domain::{FieldValue, ResolvedSchema, SchemaField};

/// Default bound on a single `SET_GCODE_VARIABLE` call
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Encode a field value as a Klipper literal.
///
/// Klipper shell-splits the parameters and then evaluates `VALUE` as a
/// Python literal, so strings are double-quoted inside single quotes.
pub fn encode_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => "None".to_string(),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Text(text) => format!("'\"{}\"'", escape_text(text)),
    }
}

fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\'' => escaped.push_str("\\x27"),
            '#' => escaped.push_str("\\x23"),
            ';' => escaped.push_str("\\x3b"),
            '*' => escaped.push_str("\\x2a"),
            '\n' | '\r' => escaped.push(' '),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Build the script that sets one variable
pub fn set_variable_script(macro_name: &str, field: SchemaField, value: &FieldValue) -> String {
    format!(
        "SET_GCODE_VARIABLE MACRO={} VARIABLE={} VALUE={}",
        macro_name,
        field.as_str(),
        encode_value(value)
    )
}

/// All six scripts for a schema, in write order
pub fn scripts_for(macro_name: &str, schema: &ResolvedSchema) -> Vec<String> {
    schema
        .fields()
        .map(|(field, value)| set_variable_script(macro_name, field, value))
        .collect()
}

/// Outcome of one schema write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Fields written successfully
    pub written: usize,

    /// Fields whose write failed
    pub failed: usize,

    /// The macro is missing and nothing was attempted
    pub target_missing: bool,
}

/// Writes resolved schemas to the host's macro variables
pub struct VariableWriter {
    sink: Arc<dyn GcodeSink>,
    macro_name: String,
    write_timeout: Duration,
    target_missing: bool,
}

impl VariableWriter {
    pub fn new(sink: Arc<dyn GcodeSink>, macro_name: impl Into<String>) -> Self {
        Self {
            sink,
            macro_name: macro_name.into(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            target_missing: false,
        }
    }

    /// Bound each script by `write_timeout` instead of the default
    pub fn with_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn macro_name(&self) -> &str {
        &self.macro_name
    }

    /// Whether the writer has given up because the macro does not exist
    pub fn is_disabled(&self) -> bool {
        self.target_missing
    }

    /// Issue one update per field
    pub async fn write(&mut self, schema: &ResolvedSchema) -> WriteReport {
        let mut report = WriteReport::default();

        if self.target_missing {
            debug!(macro_name = %self.macro_name, "Macro missing, skipping write");
            report.target_missing = true;
            return report;
        }

        for (field, value) in schema.fields() {
            let script = set_variable_script(&self.macro_name, field, value);

            let call = self.sink.run_gcode(&script);
            let result = match tokio::time::timeout(self.write_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(GcodeError::Failed(format!(
                    "no response after {:?}",
                    self.write_timeout
                ))),
            };

            match result {
                Ok(()) => report.written += 1,
                Err(GcodeError::TargetMissing(message)) => {
                    warn!(
                        macro_name = %self.macro_name,
                        error = %message,
                        "gcode_macro not found; spool details will not be pushed until restart"
                    );
                    self.target_missing = true;
                    report.target_missing = true;
                    return report;
                }
                Err(GcodeError::Failed(message)) => {
                    warn!(variable = %field, error = %message, "Failed to update macro variable");
                    report.failed += 1;
                }
            }
        }

        if report.failed == 0 {
            info!(macro_name = %self.macro_name, "Macro variables updated");
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_values() {
        assert_eq!(encode_value(&FieldValue::Null), "None");
        assert_eq!(encode_value(&FieldValue::Number(210.into())), "210");
        assert_eq!(encode_value(&FieldValue::Text("PLA".to_string())), r#"'"PLA"'"#);
    }

    #[test]
    fn test_escape_awkward_strings() {
        let value = FieldValue::Text("Bob's \"Best\"\nC:\\".to_string());
        assert_eq!(
            encode_value(&value),
            r#"'"Bob\x27s \"Best\" C:\\"'"#
        );
    }

    #[test]
    fn test_escape_comment_characters() {
        // Klipper drops everything after '#', ';' or '*' on a command line
        let value = FieldValue::Text("Galaxy Black #2; matte*".to_string());
        let encoded = encode_value(&value);

        assert_eq!(encoded, r#"'"Galaxy Black \x232\x3b matte\x2a"'"#);
        assert!(!encoded.contains(&['#', ';', '*'][..]));
    }

    #[test]
    fn test_set_variable_script() {
        let script = set_variable_script(
            "SPOOLMAN_VARS",
            SchemaField::Material,
            &FieldValue::Text("PETG".to_string()),
        );
        assert_eq!(
            script,
            r#"SET_GCODE_VARIABLE MACRO=SPOOLMAN_VARS VARIABLE=material VALUE='"PETG"'"#
        );
    }

    struct CountingSink(std::sync::Mutex<usize>);

    #[async_trait::async_trait]
    impl GcodeSink for CountingSink {
        async fn run_gcode(&self, _script: &str) -> Result<(), GcodeError> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_write_issues_one_script_per_field() {
        let sink = Arc::new(CountingSink(std::sync::Mutex::new(0)));
        let mut writer = VariableWriter::new(sink.clone(), "SPOOLMAN_VARS");

        let report = tokio_test::block_on(writer.write(&ResolvedSchema::all_null()));

        assert_eq!(report.written, 6);
        assert_eq!(*sink.0.lock().unwrap(), 6);
        assert!(!writer.is_disabled());
    }

    struct SilentSink;

    #[async_trait::async_trait]
    impl GcodeSink for SilentSink {
        async fn run_gcode(&self, _script: &str) -> Result<(), GcodeError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_scripts_time_out_as_failures() {
        let mut writer = VariableWriter::new(Arc::new(SilentSink), "SPOOLMAN_VARS")
            .with_timeout(Duration::from_millis(250));

        let started = tokio::time::Instant::now();
        let report = writer.write(&ResolvedSchema::all_null()).await;

        assert_eq!(report.written, 0);
        assert_eq!(report.failed, 6);
        assert!(!report.target_missing);
        assert!(!writer.is_disabled());
        // Six scripts, each cut off at the timeout
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_scripts_for_all_null() {
        let scripts = scripts_for("SPOOLMAN_VARS", &ResolvedSchema::all_null());
        assert_eq!(scripts.len(), 6);
        assert_eq!(
            scripts[0],
            "SET_GCODE_VARIABLE MACRO=SPOOLMAN_VARS VARIABLE=id VALUE=None"
        );
        assert!(scripts.iter().all(|s| s.ends_with("VALUE=None")));
    }
}
