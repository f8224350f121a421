use super::html::insert_before;
use super::Pass;
use crate::bundler::build::{Asset, AssetOrigin, Build};
use crate::bundler::naming::{self, NameParts};
use crate::config::IconsConfig;
use crate::error::BuildError;
use image::codecs::ico::{IcoEncoder, IcoFrame};
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType};
use packline_util::hash::blake3_bytes;
use rayon::prelude::*;
use serde_json::json;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const FAVICON_SIZES: &[u32] = &[16, 32];
const ICO_SIZES: &[u32] = &[16, 32, 48];
const ANDROID_SIZES: &[u32] = &[36, 48, 72, 96, 144, 192, 256, 384, 512];
const APPLE_SIZES: &[u32] = &[57, 60, 72, 76, 114, 120, 144, 152, 167, 180];
const FIREFOX_SIZES: &[u32] = &[60, 128, 512];

/// One square PNG rendition of the logo.
struct Rendition {
    file: String,
    size: u32,
}

/// Generates favicons, platform icons and a web app manifest from one logo
/// and links them from every page.
pub struct IconsPass {
    logo: PathBuf,
    prefix: String,
    required: bool,
    app_name: String,
    background: String,
}

impl IconsPass {
    #[must_use]
    pub fn new(root: &Path, config: &IconsConfig) -> Self {
        Self {
            logo: root.join(&config.logo),
            prefix: config.prefix.clone(),
            required: config.required,
            app_name: config.app_name.clone(),
            background: config.background.clone(),
        }
    }

    fn renditions() -> Vec<Rendition> {
        let mut out = Vec::new();
        for &size in FAVICON_SIZES {
            out.push(Rendition {
                file: format!("favicon-{size}x{size}.png"),
                size,
            });
        }
        for &size in ANDROID_SIZES {
            out.push(Rendition {
                file: format!("android-chrome-{size}x{size}.png"),
                size,
            });
        }
        for &size in APPLE_SIZES {
            out.push(Rendition {
                file: format!("apple-touch-icon-{size}x{size}.png"),
                size,
            });
        }
        out.push(Rendition {
            file: "apple-touch-icon.png".to_string(),
            size: 180,
        });
        for &size in FIREFOX_SIZES {
            out.push(Rendition {
                file: format!("firefox_app_{size}x{size}.png"),
                size,
            });
        }
        out
    }

    fn manifest(&self, dir: &str) -> Vec<u8> {
        let icons: Vec<_> = ANDROID_SIZES
            .iter()
            .map(|size| {
                json!({
                    "src": format!("{dir}android-chrome-{size}x{size}.png"),
                    "sizes": format!("{size}x{size}"),
                    "type": "image/png",
                })
            })
            .collect();
        let manifest = json!({
            "name": self.app_name,
            "short_name": self.app_name,
            "icons": icons,
            "background_color": self.background,
            "theme_color": self.background,
            "display": "standalone",
            "start_url": "./",
        });
        serde_json::to_vec_pretty(&manifest).unwrap_or_default()
    }

    fn links(public_dir: &str) -> String {
        let mut links = String::new();
        links.push_str(&format!(
            "<link rel=\"shortcut icon\" href=\"{public_dir}favicon.ico\">"
        ));
        for &size in FAVICON_SIZES {
            links.push_str(&format!(
                "<link rel=\"icon\" type=\"image/png\" sizes=\"{size}x{size}\" \
                 href=\"{public_dir}favicon-{size}x{size}.png\">"
            ));
        }
        for &size in APPLE_SIZES {
            links.push_str(&format!(
                "<link rel=\"apple-touch-icon\" sizes=\"{size}x{size}\" \
                 href=\"{public_dir}apple-touch-icon-{size}x{size}.png\">"
            ));
        }
        links.push_str(&format!("<link rel=\"manifest\" href=\"{public_dir}manifest.json\">"));
        links
    }
}

fn failure(message: impl Into<String>) -> BuildError {
    BuildError::PassFailure {
        pass: "icons",
        message: message.into(),
    }
}

fn encode_png(img: &DynamicImage, size: u32) -> Result<Vec<u8>, BuildError> {
    let resized = img.resize_exact(size, size, FilterType::Lanczos3);
    let mut buf = Vec::new();
    resized
        .write_with_encoder(PngEncoder::new(&mut buf))
        .map_err(|e| failure(format!("PNG encode failed: {e}")))?;
    Ok(buf)
}

fn encode_ico(img: &DynamicImage) -> Result<Vec<u8>, BuildError> {
    let mut frames = Vec::with_capacity(ICO_SIZES.len());
    for &size in ICO_SIZES {
        let rgba = img.resize_exact(size, size, FilterType::Lanczos3).to_rgba8();
        let frame = IcoFrame::as_png(rgba.as_raw(), size, size, ExtendedColorType::Rgba8)
            .map_err(|e| failure(format!("ICO frame failed: {e}")))?;
        frames.push(frame);
    }
    let mut buf = Vec::new();
    IcoEncoder::new(&mut buf)
        .encode_images(&frames)
        .map_err(|e| failure(format!("ICO encode failed: {e}")))?;
    Ok(buf)
}

impl Pass for IconsPass {
    fn name(&self) -> &'static str {
        "icons"
    }

    fn run(&self, build: &mut Build) -> Result<(), BuildError> {
        let bytes = match fs::read(&self.logo) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !self.required => {
                debug!(logo = %self.logo.display(), "icon source missing, skipping");
                return Ok(());
            }
            Err(e) => return Err(BuildError::io(&self.logo, e)),
        };
        let img = image::load_from_memory(&bytes)
            .map_err(|e| failure(format!("cannot decode {}: {e}", self.logo.display())))?;

        let digest = blake3_bytes(&bytes);
        let dir = naming::render(
            &self.prefix,
            &NameParts {
                name: "icons",
                hash: &digest,
                ext: "",
            },
        );

        let renditions = Self::renditions();
        let encoded: Vec<Result<Vec<u8>, BuildError>> = renditions
            .par_iter()
            .map(|r| encode_png(&img, r.size))
            .collect();

        let mut assets = Vec::with_capacity(renditions.len() + 2);
        for (rendition, png) in renditions.iter().zip(encoded) {
            assets.push(Asset {
                file: format!("{dir}{}", rendition.file),
                bytes: Arc::new(png?),
                origin: AssetOrigin::Icons,
            });
        }
        assets.push(Asset {
            file: format!("{dir}favicon.ico"),
            bytes: Arc::new(encode_ico(&img)?),
            origin: AssetOrigin::Icons,
        });
        assets.push(Asset {
            file: format!("{dir}manifest.json"),
            bytes: Arc::new(self.manifest(&format!("{}{dir}", build.public_path))),
            origin: AssetOrigin::Icons,
        });

        build.assets.retain(|a| a.origin != AssetOrigin::Icons);
        build.assets.extend(assets);

        let public_dir = format!("{}{dir}", build.public_path);
        let links = Self::links(&public_dir);
        for page in &mut build.pages {
            if !page.html.contains(&links) {
                page.html = insert_before(&page.html, "</head>", &links);
            }
        }
        debug!(dir = %dir, icons = renditions.len() + 1, "icons generated");
        Ok(())
    }
}
