use super::super::chain::{ModuleValue, StepContext, StepError, TransformStep};
use super::file::emit_file;
use super::{mime_type, opt_str, opt_u64};
use crate::bundler::naming::stem_and_ext;
use crate::js;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

/// Inlines files smaller than `limit` bytes as `data:` URIs; larger files
/// are emitted like the `file` step.
pub struct UrlStep;

impl TransformStep for UrlStep {
    fn name(&self) -> &'static str {
        "url"
    }

    fn run(
        &self,
        _input: ModuleValue,
        options: &Value,
        cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError> {
        let limit = opt_u64(options, "limit").unwrap_or(0);
        let size = cx.module.source.len() as u64;
        if size >= limit {
            return Ok(emit_file(options, cx));
        }

        let file_name = cx
            .module
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime = opt_str(options, "mimetype")
            .unwrap_or_else(|| mime_type(stem_and_ext(&file_name).1));
        let mime = mime.split(';').next().unwrap_or(mime);
        let uri = format!("data:{mime};base64,{}", STANDARD.encode(cx.module.source.as_slice()));

        let code = format!("module.exports = {};\n", js::quote(&uri));
        cx.set_public_url(uri);
        Ok(ModuleValue::Script(code))
    }
}
