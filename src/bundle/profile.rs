//! src/bundle/profile.rs
//! Generates the `Rprofile.site` shipped inside the bundle. The AppImage is mounted
//! read-only, so both variants block `install.packages()` with an explanation.

use crate::config::BuildMode;

const HEADER: &str = "# Rprofile.site generated by r-appimage. Do not edit inside the AppDir.\n";

// Site profiles are evaluated before the default packages are attached, so the
// replacement is installed from an attach hook (or immediately, if utils is already
// on the search path). Both the namespace and the attached `package:utils` copy are
// replaced; their bindings are locked and must be unlocked around the assignment.
const BLOCKER: &str = r#"local({
  options(repos = c(CRAN = "@MIRROR@"))
  msg <- .r_appimage_install_message
  blocked <- function(...) stop(msg, call. = FALSE)
  replace <- function(env) {
    if (!exists("install.packages", envir = env, inherits = FALSE)) return(invisible())
    locked <- bindingIsLocked("install.packages", env)
    if (locked) unlockBinding("install.packages", env)
    assign("install.packages", blocked, envir = env)
    if (locked) lockBinding("install.packages", env)
  }
  block <- function(...) {
    replace(asNamespace("utils"))
    if ("package:utils" %in% search()) replace(as.environment("package:utils"))
  }
  if ("package:utils" %in% search()) block()
  setHook(packageEvent("utils", "attach"), block)
})
"#;

fn minimal_message() -> String {
    "Package installation is disabled in this minimal R AppImage: the image is read-only \
     and ships only base and recommended packages. Use the with-packages build, or set \
     R_LIBS_USER to a writable library and run R from a regular installation."
        .to_string()
}

fn with_packages_message(packages: &[String]) -> String {
    format!(
        "Package installation is disabled in this R AppImage: the image is read-only. \
         Preinstalled packages: {}.",
        packages.join(", ")
    )
}

fn r_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Renders `Rprofile.site`. In minimal mode `packages` is ignored.
pub fn render_rprofile(mode: BuildMode, packages: &[String], cran_mirror: &str) -> String {
    let mut out = String::from(HEADER);
    match mode {
        BuildMode::Minimal => {
            out.push_str("# Variant: minimal\n");
            out.push_str(&format!(
                ".r_appimage_install_message <- {}\n",
                r_string(&minimal_message())
            ));
        }
        BuildMode::WithPackages => {
            let quoted: Vec<String> = packages.iter().map(|p| r_string(p)).collect();
            out.push_str("# Variant: with-packages\n");
            out.push_str(&format!(
                ".r_appimage_packages <- c({})\n",
                quoted.join(", ")
            ));
            out.push_str(&format!(
                ".r_appimage_install_message <- {}\n",
                r_string(&with_packages_message(packages))
            ));
        }
    }
    out.push_str(&BLOCKER.replace("@MIRROR@", cran_mirror));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIRROR: &str = "https://cloud.r-project.org";

    fn pkgs() -> Vec<String> {
        vec!["jsonlite".into(), "dplyr".into()]
    }

    /// `assignInNamespace` refuses base packages when called from a hook, and only
    /// touches the namespace anyway; the profile must rebind `package:utils` itself.
    fn assert_replaces_attached_binding(text: &str) {
        assert!(!text.contains("assignInNamespace"));
        assert!(text.contains("as.environment(\"package:utils\")"));
        assert!(text.contains("asNamespace(\"utils\")"));
        assert!(text.contains("unlockBinding(\"install.packages\", env)"));
        assert!(text.contains("lockBinding(\"install.packages\", env)"));
        assert!(text.contains("setHook(packageEvent(\"utils\", \"attach\"), block)"));
    }

    #[test]
    fn minimal_profile_mentions_no_packages_and_blocks_installation() {
        let text = render_rprofile(BuildMode::Minimal, &pkgs(), MIRROR);
        assert!(!text.contains("jsonlite"));
        assert!(!text.contains("dplyr"));
        assert!(text.contains("Package installation is disabled"));
        assert_replaces_attached_binding(&text);
    }

    #[test]
    fn with_packages_profile_enumerates_exactly_the_list() {
        let text = render_rprofile(BuildMode::WithPackages, &pkgs(), MIRROR);
        assert!(text.contains(".r_appimage_packages <- c(\"jsonlite\", \"dplyr\")\n"));
        assert!(text.contains("Preinstalled packages: jsonlite, dplyr."));
        assert!(text.contains("Package installation is disabled"));
        assert_replaces_attached_binding(&text);
    }

    #[test]
    fn mirror_is_substituted() {
        let text = render_rprofile(BuildMode::Minimal, &[], "https://cran.example.org");
        assert!(text.contains("options(repos = c(CRAN = \"https://cran.example.org\"))"));
        assert!(!text.contains("@MIRROR@"));
    }

    #[test]
    fn r_strings_are_escaped() {
        assert_eq!(r_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }

    /// Runs the rendered profile in a real R. Needs `Rscript` on PATH:
    /// `cargo test -- --ignored installation_is_blocked_in_r`.
    #[test]
    #[ignore]
    fn installation_is_blocked_in_r() {
        use std::process::Command;

        let tmp = tempfile::TempDir::new().unwrap();
        for (mode, expected) in [
            (BuildMode::Minimal, "Package installation is disabled in this minimal R AppImage"),
            (BuildMode::WithPackages, "Preinstalled packages: jsonlite, dplyr."),
        ] {
            let site = tmp.path().join(format!("Rprofile.{}", mode));
            std::fs::write(&site, render_rprofile(mode, &pkgs(), MIRROR)).unwrap();
            let out = Command::new("Rscript")
                .arg("-e")
                .arg(
                    "r <- tryCatch({ install.packages('x'); 'installed' }, \
                     error = function(e) conditionMessage(e)); \
                     cat(r, '\\n'); \
                     quit(status = if (identical(r, 'installed')) 1L else 0L)",
                )
                .env("R_PROFILE", &site)
                .env("R_PROFILE_USER", "/dev/null")
                .output()
                .expect("Rscript on PATH");
            let stdout = String::from_utf8_lossy(&out.stdout);
            let stderr = String::from_utf8_lossy(&out.stderr);
            assert!(out.status.success(), "{mode}: stdout={stdout} stderr={stderr}");
            assert!(stdout.contains(expected), "{mode}: {stdout}");
            assert!(!stderr.contains("Error"), "{mode}: profile failed: {stderr}");
        }
    }
}
