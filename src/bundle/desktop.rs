//! src/bundle/desktop.rs
//! Desktop entry, icon and AppStream metadata for the bundle.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::config::{BuildConfig, BuildMode};
use crate::error::{Error, IoContext, Result};
use crate::exec;
use crate::fetch;
use crate::output;

pub const APP_ID: &str = "org.r_project.R";
pub const ICON_NAME: &str = "r-project";
pub const ICON_SIZE: u32 = 256;
pub const LOGO_URL: &str = "https://www.r-project.org/logo/Rlogo.svg";

// --- Text generators ---

fn mode_summary(mode: BuildMode, packages: &[String]) -> String {
    match mode {
        BuildMode::Minimal => "minimal build with base and recommended packages".to_string(),
        BuildMode::WithPackages => format!("bundled with {}", packages.join(", ")),
    }
}

pub fn render_desktop_entry(cfg: &BuildConfig) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name=R\n\
         GenericName=Statistical Computing Environment\n\
         Comment=R {version} for statistical computing and graphics ({summary})\n\
         Exec=R\n\
         Icon={icon}\n\
         Terminal=true\n\
         Categories=Education;Science;Math;\n\
         Keywords=statistics;data;analysis;programming;\n\
         X-AppImage-Version={version}\n",
        version = cfg.version,
        summary = mode_summary(cfg.mode, &cfg.packages),
        icon = ICON_NAME,
    )
}

pub fn render_appdata(cfg: &BuildConfig) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<component type="desktop-application">
  <id>{id}</id>
  <metadata_license>CC0-1.0</metadata_license>
  <project_license>GPL-2.0-or-later</project_license>
  <name>R</name>
  <summary>Environment for statistical computing and graphics</summary>
  <description>
    <p>
      R is a language and environment for statistical computing and graphics.
      This portable build of R {version} runs on most Linux distributions without installation.
    </p>
    <p>Variant: {mode} ({summary}).</p>
  </description>
  <launchable type="desktop-id">{id}.desktop</launchable>
  <url type="homepage">https://www.r-project.org/</url>
  <provides>
    <binary>R</binary>
    <binary>Rscript</binary>
  </provides>
  <categories>
    <category>Science</category>
    <category>Math</category>
  </categories>
  <releases>
    <release version="{version}"/>
  </releases>
  <content_rating type="oars-1.1"/>
</component>
"#,
        id = APP_ID,
        version = cfg.version,
        mode = cfg.mode,
        summary = mode_summary(cfg.mode, &cfg.packages),
    )
}

// --- Icon rasterisation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    RsvgConvert,
    ImageMagick,
    Inkscape,
}

impl Converter {
    /// Preference order.
    pub const ALL: [Converter; 3] = [Converter::RsvgConvert, Converter::ImageMagick, Converter::Inkscape];

    pub fn program(&self) -> &'static str {
        match self {
            Converter::RsvgConvert => "rsvg-convert",
            Converter::ImageMagick => "convert",
            Converter::Inkscape => "inkscape",
        }
    }

    pub fn args(&self, svg: &Path, png: &Path, size: u32) -> Vec<String> {
        let (svg, png, size) = (svg.display().to_string(), png.display().to_string(), size.to_string());
        match self {
            Converter::RsvgConvert => vec!["-w".into(), size.clone(), "-h".into(), size, "-o".into(), png, svg],
            Converter::ImageMagick => vec![
                "-background".into(),
                "none".into(),
                "-resize".into(),
                format!("{0}x{0}", size),
                svg,
                png,
            ],
            Converter::Inkscape => vec![
                "-w".into(),
                size.clone(),
                "-h".into(),
                size,
                svg,
                "-o".into(),
                png,
            ],
        }
    }
}

/// Rasterises `svg` with the first available converter that succeeds.
/// `convert` runs a converter and reports whether it produced the file.
pub fn rasterize_with<A, C>(svg: &Path, png: &Path, size: u32, is_available: A, mut convert: C) -> Result<Converter>
where
    A: Fn(&str) -> bool,
    C: FnMut(Converter, &Path, &Path, u32) -> bool,
{
    let mut tried = Vec::new();
    for converter in Converter::ALL {
        if !is_available(converter.program()) {
            continue;
        }
        tried.push(converter.program().to_string());
        if convert(converter, svg, png, size) && png.is_file() {
            return Ok(converter);
        }
        output::warn(&format!("{} failed to rasterise the icon, trying next converter", converter.program()));
    }
    if tried.is_empty() {
        tried = Converter::ALL.iter().map(|c| c.program().to_string()).collect();
    }
    Err(Error::NoIconConverter { tried })
}

/// Runs `converter` on the host.
pub fn run_converter(converter: Converter, svg: &Path, png: &Path, size: u32) -> bool {
    exec::capture(Command::new(converter.program()).args(converter.args(svg, png, size)))
        .map(|out| {
            if !out.success() {
                debug!(converter = converter.program(), output = %out.text, "converter failed");
            }
            out.success()
        })
        .unwrap_or(false)
}

// --- Validation ---

/// Runs an optional validator. Absence or a failed validation is only a warning.
fn validate_optional(program: &str, args: &[&str], file: &Path, is_available: impl Fn(&str) -> bool) {
    if !is_available(program) {
        output::warn(&format!("{} not found, skipping validation of {}", program, file.display()));
        return;
    }
    match exec::capture(Command::new(program).args(args).arg(file)) {
        Ok(out) if out.success() => output::success(&format!("{} validated", file.display())),
        Ok(out) => output::warn(&format!("{} reported problems:\n{}", program, out.text.trim_end())),
        Err(e) => output::warn(&e.to_string()),
    }
}

// --- Public API ---

/// Generated metadata files, staged outside the AppDir.
#[derive(Debug, Clone)]
pub struct DesktopFiles {
    pub desktop: PathBuf,
    pub icon: PathBuf,
    pub appdata: PathBuf,
}

/// Writes desktop entry, icon and AppStream file into `staging`. The logo is
/// fetched with `download` unless cached; `convert` rasterises it.
pub fn generate<A, D, C>(cfg: &BuildConfig, staging: &Path, is_available: A, download: D, convert: C) -> Result<DesktopFiles>
where
    A: Fn(&str) -> bool + Copy,
    D: FnOnce(&str, &Path) -> Result<()>,
    C: FnMut(Converter, &Path, &Path, u32) -> bool,
{
    fs::create_dir_all(staging).at(staging)?;

    let desktop = staging.join(format!("{}.desktop", APP_ID));
    fs::write(&desktop, render_desktop_entry(cfg)).at(&desktop)?;
    validate_optional("desktop-file-validate", &[], &desktop, is_available);

    let appdata = staging.join(format!("{}.appdata.xml", APP_ID));
    fs::write(&appdata, render_appdata(cfg)).at(&appdata)?;
    validate_optional("appstream-util", &["validate-relax", "--nonet"], &appdata, is_available);

    let svg = cfg.downloads_dir().join("Rlogo.svg");
    fetch::ensure_cached(LOGO_URL, &svg, download)?;
    let icon = staging.join(format!("{}.png", ICON_NAME));
    if icon.exists() {
        fs::remove_file(&icon).at(&icon)?;
    }
    let used = rasterize_with(&svg, &icon, ICON_SIZE, is_available, convert)?;
    output::success(&format!("Icon rasterised with {}", used.program()));

    Ok(DesktopFiles { desktop, icon, appdata })
}

/// Places the metadata into the AppDir layout plus the root-level copies the
/// AppImage convention requires (desktop file, icon, `.DirIcon`).
pub fn install_into(files: &DesktopFiles, appdir: &Path) -> Result<()> {
    let targets = [
        (&files.desktop, appdir.join("usr/share/applications").join(format!("{}.desktop", APP_ID))),
        (
            &files.icon,
            appdir
                .join(format!("usr/share/icons/hicolor/{0}x{0}/apps", ICON_SIZE))
                .join(format!("{}.png", ICON_NAME)),
        ),
        (&files.appdata, appdir.join("usr/share/metainfo").join(format!("{}.appdata.xml", APP_ID))),
        (&files.desktop, appdir.join(format!("{}.desktop", APP_ID))),
        (&files.icon, appdir.join(format!("{}.png", ICON_NAME))),
    ];
    for (src, dst) in targets {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        fs::copy(src, &dst).at(&dst)?;
    }

    let dir_icon = appdir.join(".DirIcon");
    if dir_icon.symlink_metadata().is_ok() {
        fs::remove_file(&dir_icon).at(&dir_icon)?;
    }
    symlink(format!("{}.png", ICON_NAME), &dir_icon).at(&dir_icon)?;
    Ok(())
}
