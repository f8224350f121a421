use super::super::chain::{ModuleValue, SideArtifact, StepContext, StepError, TransformStep};
use super::super::naming::{self, NameParts};
use super::opt_str;
use crate::js;
use packline_util::hash::blake3_bytes;
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_NAME: &str = "static/assets/[name].[hash:8].[ext]";

/// Emits the module's bytes as a standalone file named from the `name`
/// template and exports its public URL.
pub struct FileStep;

impl TransformStep for FileStep {
    fn name(&self) -> &'static str {
        "file"
    }

    fn run(
        &self,
        _input: ModuleValue,
        options: &Value,
        cx: &mut StepContext<'_>,
    ) -> Result<ModuleValue, StepError> {
        Ok(emit_file(options, cx))
    }
}

/// Emit the module's original bytes under their digest name.
pub(super) fn emit_file(options: &Value, cx: &mut StepContext<'_>) -> ModuleValue {
    let bytes = Arc::clone(&cx.module.source);
    let digest = blake3_bytes(&bytes);
    let file_name = cx
        .module
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = naming::stem_and_ext(&file_name);
    let name = naming::render(
        opt_str(options, "name").unwrap_or(DEFAULT_NAME),
        &NameParts {
            name: stem,
            hash: &digest,
            ext,
        },
    );

    let code = format!("module.exports = __packline.p + {};\n", js::quote(&name));
    cx.emit(SideArtifact::Emit {
        name: name.clone(),
        bytes,
    });
    cx.set_public_url(name);
    ModuleValue::Script(code)
}
