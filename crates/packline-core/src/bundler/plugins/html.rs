use super::Pass;
use crate::bundler::build::{Build, BundleKind, Page};
use crate::config::{PageConfig, PipelineConfig};
use crate::error::BuildError;
use regex_lite::Regex;
use std::fs;
use std::path::{Path, PathBuf};

const BUILTIN_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title><%= htmlWebpackPlugin.options.title %></title>
  </head>
  <body>
    <div id="root"></div>
  </body>
</html>
"#;

/// Generates one HTML document per configured page.
///
/// Stylesheet links go before `</head>`, scripts before `</body>`: named
/// chunks first, then entries, then the development client.
pub struct HtmlPass {
    root: PathBuf,
    pages: Vec<PageConfig>,
    public_path: String,
    dev_client: Option<String>,
    minify: bool,
}

impl HtmlPass {
    #[must_use]
    pub fn new(root: &Path, config: &PipelineConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            pages: config.pages.clone(),
            public_path: config.output.public_path.clone(),
            dev_client: config.dev_client.clone(),
            minify: config.minify.html,
        }
    }

    fn template(&self, page: &PageConfig) -> Result<String, BuildError> {
        let Some(template) = &page.template else {
            return Ok(BUILTIN_TEMPLATE.to_string());
        };
        let path = self.root.join(template);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BUILTIN_TEMPLATE.to_string()),
            Err(e) => Err(BuildError::io(path, e)),
        }
    }

    fn render(&self, page: &PageConfig, build: &Build) -> Result<String, BuildError> {
        let template = self.template(page)?;
        let title = Regex::new(r"<%=\s*(?:htmlWebpackPlugin\.options\.)?title\s*%>")
            .map_err(|e| pass_failure(e.to_string()))?;
        let mut html = title
            .replace_all(&template, escape_html(&page.title).as_str())
            .into_owned();

        let included = |name: &str| {
            page.chunks
                .as_ref()
                .map_or(true, |chunks| chunks.iter().any(|n| n == name))
        };

        let mut links = String::new();
        for sheet in build.stylesheets.iter().filter(|s| included(&s.bundle)) {
            links.push_str(&format!(
                "<link href=\"{}{}\" rel=\"stylesheet\">",
                self.public_path, sheet.file
            ));
        }

        let mut scripts = String::new();
        for kind in [BundleKind::Named, BundleKind::Entry] {
            for bundle in build
                .bundles
                .iter()
                .filter(|b| b.kind == kind && included(&b.name))
            {
                scripts.push_str(&format!(
                    "<script type=\"text/javascript\" src=\"{}{}\"></script>",
                    self.public_path, bundle.file
                ));
            }
        }
        if let Some(client) = &self.dev_client {
            scripts.push_str(&format!(
                "<script type=\"text/javascript\" src=\"{client}\"></script>"
            ));
        }

        html = insert_before(&html, "</head>", &links);
        html = insert_before(&html, "</body>", &scripts);
        if self.minify {
            html = minify_html(&html)?;
        }
        Ok(html)
    }
}

impl Pass for HtmlPass {
    fn name(&self) -> &'static str {
        "html"
    }

    fn run(&self, build: &mut Build) -> Result<(), BuildError> {
        let mut pages = Vec::with_capacity(self.pages.len());
        for page in &self.pages {
            pages.push(Page {
                file: page.filename.clone(),
                html: self.render(page, build)?,
            });
        }
        build.pages = pages;
        Ok(())
    }
}

fn pass_failure(message: String) -> BuildError {
    BuildError::PassFailure {
        pass: "html",
        message,
    }
}

/// Insert `text` before the last `tag` (any case), or append it.
pub(super) fn insert_before(html: &str, tag: &str, text: &str) -> String {
    if text.is_empty() {
        return html.to_string();
    }
    match html.to_ascii_lowercase().rfind(tag) {
        Some(at) => format!("{}{text}{}", &html[..at], &html[at..]),
        None => format!("{html}{text}"),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Comment removal, whitespace collapsing, short doctype and redundant
/// `type` attribute removal.
fn minify_html(html: &str) -> Result<String, BuildError> {
    let rules = [
        (r"<!--[\s\S]*?-->", ""),
        (r"(?i)<!DOCTYPE[^>]*>", "<!DOCTYPE html>"),
        (r#"\s+type="text/(?:javascript|css)""#, ""),
        (r">\s+<", "><"),
        (r"\s{2,}", " "),
    ];
    let mut out = html.to_string();
    for (pattern, replacement) in rules {
        let re = Regex::new(pattern).map_err(|e| pass_failure(e.to_string()))?;
        out = re.replace_all(&out, replacement).into_owned();
    }
    Ok(out.trim().to_string())
}
