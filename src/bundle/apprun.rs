//! src/bundle/apprun.rs
//! The `AppRun` launcher at the AppDir root. R's scripts hard-code the install prefix,
//! so the launcher points every R_* variable at the mounted image instead.

/// Renders `AppRun`. `r_home_rel` is R home relative to the AppDir (e.g. `usr/lib/R`).
pub fn render_apprun(r_home_rel: &str) -> String {
    format!(
        r#"#!/bin/sh
# AppRun generated by r-appimage
set -e

HERE="$(dirname "$(readlink -f "$0")")"
APPDIR="${{APPDIR:-$HERE}}"

export R_HOME="$APPDIR/{r_home}"
export RHOME="$R_HOME"
export R_SHARE_DIR="$R_HOME/share"
export R_INCLUDE_DIR="$R_HOME/include"
export R_DOC_DIR="$R_HOME/doc"
export LD_LIBRARY_PATH="$APPDIR/usr/lib:$R_HOME/lib${{LD_LIBRARY_PATH:+:$LD_LIBRARY_PATH}}"
export PATH="$APPDIR/usr/bin:$PATH"

name="$(basename "${{ARGV0:-$0}}")"
case "$name" in
  Rscript*)
    exec "$R_HOME/bin/Rscript" "$@"
    ;;
esac
if [ "${{1:-}}" = "Rscript" ]; then
  shift
  exec "$R_HOME/bin/Rscript" "$@"
fi

exec "$R_HOME/bin/R" "$@"
"#,
        r_home = r_home_rel
    )
}
