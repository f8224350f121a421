use super::super::chain::{ModuleValue, StepContext, StepError, TransformStep};
use serde_json::Value;

/// Validates a JSON document and exports it as the module value.
pub struct JsonStep;

impl TransformStep for JsonStep {
    fn name(&self) -> &'static str {
        "json"
    }

    fn run(
        &self,
        input: ModuleValue,
        _options: &Value,
        cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError> {
        let text = input.text();
        let body = text.trim_start_matches('\u{feff}').trim_end();
        serde_json::from_str::<Value>(body)
            .map_err(|e| StepError::failed(format!("invalid JSON: {e}")))?;

        // Line and paragraph separators are valid JSON but not valid in
        // older script string literals.
        let body = body.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029");
        cx.preserve_lines();
        Ok(ModuleValue::Script(format!("module.exports = {body};\n")))
    }
}
