//! src/bundle/libs.rs
//! Shared-library discovery: R's private libraries, and the ldd-derived dependency
//! closure of the bundled executables minus libraries every target host provides.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{IoContext, Result};
use crate::exec;

/// Libraries assumed present on any target host, matched by soname prefix.
pub const EXCLUDED_LIBS: &[&str] = &[
    "ld-linux",
    "linux-vdso",
    "libc.so",
    "libm.so",
    "libdl.so",
    "libpthread.so",
    "librt.so",
    "libresolv.so",
    "libutil.so",
    "libanl.so",
    "libnsl.so",
    "libBrokenLocale.so",
    "libgcc_s.so",
    "libX11.so",
    "libX11-xcb.so",
    "libxcb.so",
    "libXau.so",
    "libXdmcp.so",
    "libXext.so",
    "libXrender.so",
    "libICE.so",
    "libSM.so",
    "libGL.so",
    "libEGL.so",
    "libGLX.so",
    "libOpenGL.so",
    "libGLdispatch.so",
    "libdrm.so",
    "libasound.so",
    "libfontconfig.so",
    "libfreetype.so",
    "libharfbuzz.so",
    "libfribidi.so",
    "libexpat.so",
    "libuuid.so",
    "libz.so",
];

pub fn is_excluded(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    EXCLUDED_LIBS.iter().any(|prefix| name.starts_with(prefix))
}

fn is_shared_object(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .map(|n| {
                let n = n.to_string_lossy();
                n.ends_with(".so") || n.contains(".so.")
            })
            .unwrap_or(false)
}

/// Shared objects shipped inside R home (`lib/` and `modules/`), which the bundling
/// helper would not find on its own.
pub fn private_libraries(r_home: &Path) -> Result<Vec<PathBuf>> {
    let mut libs = Vec::new();
    for dir in [r_home.join("lib"), r_home.join("modules")] {
        if !dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&dir).at(&dir)? {
            let path = entry.at(&dir)?.path();
            if is_shared_object(&path) {
                libs.push(path);
            }
        }
    }
    libs.sort();
    Ok(libs)
}

/// Transitive library set of the bundled objects.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyClosure {
    pub libs: BTreeSet<PathBuf>,
    /// Sonames ldd could not resolve.
    pub unresolved: BTreeSet<String>,
}

impl DependencyClosure {
    /// Adds resolved libraries from one `ldd` listing, honouring the exclusion set
    /// and skipping anything under `private_root`.
    pub fn add_ldd_output(&mut self, ldd: &str, private_root: &Path) {
        for line in ldd.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            // Handle lines like:
            // /lib64/ld-linux-x86-64.so.2 (0x...)
            // libsomething.so.6 => /lib/x86_64-linux-gnu/libsomething.so.6 (0x...)
            // libmissing.so.1 => not found
            let path_to_lib = if line.contains("=>") {
                if line.contains("not found") {
                    if let Some(name) = parts.first() {
                        self.unresolved.insert(name.to_string());
                    }
                    None
                } else if parts.len() >= 3 && parts[2].starts_with('/') {
                    Some(parts[2])
                } else {
                    None
                }
            } else if parts.len() >= 2 && parts[0].starts_with('/') {
                Some(parts[0])
            } else {
                None
            };

            if let Some(p) = path_to_lib {
                let path = PathBuf::from(p);
                if !is_excluded(&path) && !path.starts_with(private_root) {
                    self.libs.insert(path);
                }
            }
        }
    }
}

/// Runs `ldd` on every object and merges the results. `lib_path` is prepended to
/// `LD_LIBRARY_PATH` so R's own libraries resolve.
pub fn dependency_closure(objects: &[PathBuf], lib_path: &Path, private_root: &Path) -> Result<DependencyClosure> {
    let mut closure = DependencyClosure::default();
    for object in objects {
        let out = exec::capture(
            Command::new("ldd")
                .arg(object)
                .env("LD_LIBRARY_PATH", lib_path),
        )?;
        if !out.success() {
            // "not a dynamic executable" and friends
            debug!(object = %object.display(), "ldd reported no dependencies");
            continue;
        }
        closure.add_ldd_output(&out.text, private_root);
    }
    for soname in &closure.unresolved {
        warn!(soname = %soname, "unresolved library dependency");
    }
    Ok(closure)
}

/// Copies the closure into `dest` (the AppDir's `usr/lib`), following symlinks.
pub fn copy_closure(closure: &DependencyClosure, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest).at(dest)?;
    let mut copied = 0;
    for lib in &closure.libs {
        let Some(name) = lib.file_name() else { continue };
        let target = dest.join(name);
        if target.exists() {
            continue;
        }
        fs::copy(lib, &target).at(lib)?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LDD_SAMPLE: &str = "\
\tlinux-vdso.so.1 (0x00007ffc2b3f1000)
\tlibR.so => /build/install/usr/lib/R/lib/libR.so (0x00007f0a1c000000)
\tlibreadline.so.8 => /lib/x86_64-linux-gnu/libreadline.so.8 (0x00007f0a1bf00000)
\tlibgfortran.so.5 => /lib/x86_64-linux-gnu/libgfortran.so.5 (0x00007f0a1bc00000)
\tlibm.so.6 => /lib/x86_64-linux-gnu/libm.so.6 (0x00007f0a1bb00000)
\tlibX11.so.6 => /lib/x86_64-linux-gnu/libX11.so.6 (0x00007f0a1ba00000)
\tlibtre.so.5 => not found
\tlibc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f0a1b800000)
\t/lib64/ld-linux-x86-64.so.2 (0x00007f0a1c400000)
";

    #[test]
    fn ldd_output_is_filtered_through_exclusions() {
        let mut closure = DependencyClosure::default();
        closure.add_ldd_output(LDD_SAMPLE, Path::new("/build/install"));
        let libs: Vec<_> = closure.libs.iter().cloned().collect();
        assert_eq!(
            libs,
            vec![
                PathBuf::from("/lib/x86_64-linux-gnu/libgfortran.so.5"),
                PathBuf::from("/lib/x86_64-linux-gnu/libreadline.so.8"),
            ]
        );
        assert!(closure.unresolved.contains("libtre.so.5"));
    }

    #[test]
    fn exclusion_matches_soname_prefix() {
        assert!(is_excluded(Path::new("/lib/libc.so.6")));
        assert!(is_excluded(Path::new("/lib64/ld-linux-aarch64.so.1")));
        assert!(!is_excluded(Path::new("/lib/libcurl.so.4")));
        assert!(!is_excluded(Path::new("/lib/libpcre2-8.so.0")));
    }

    #[test]
    fn private_libraries_come_from_lib_and_modules() {
        let tmp = TempDir::new().unwrap();
        let home = tmp.path();
        fs::create_dir_all(home.join("lib")).unwrap();
        fs::create_dir_all(home.join("modules")).unwrap();
        fs::write(home.join("lib/libR.so"), b"").unwrap();
        fs::write(home.join("lib/libRblas.so"), b"").unwrap();
        fs::write(home.join("lib/README"), b"").unwrap();
        fs::write(home.join("modules/lapack.so"), b"").unwrap();

        let libs = private_libraries(home).unwrap();
        assert_eq!(
            libs,
            vec![
                home.join("lib/libR.so"),
                home.join("lib/libRblas.so"),
                home.join("modules/lapack.so"),
            ]
        );
    }

    #[test]
    fn copy_closure_skips_existing_targets() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("libfoo.so.1");
        fs::write(&src, b"lib").unwrap();
        let mut closure = DependencyClosure::default();
        closure.libs.insert(src);

        let dest = tmp.path().join("AppDir/usr/lib");
        assert_eq!(copy_closure(&closure, &dest).unwrap(), 1);
        assert_eq!(copy_closure(&closure, &dest).unwrap(), 0);
        assert!(dest.join("libfoo.so.1").is_file());
    }
}
