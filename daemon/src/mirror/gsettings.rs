use super::BackgroundSetter;
use crate::shell::GnomeShell;
use anyhow::Result;
use std::path::Path;
use std::process::Command;
use std::rc::Rc;
use std::time::Duration;

const BACKGROUND_SCHEMA: &str = "org.gnome.desktop.background";
const SCREENSAVER_SCHEMA: &str = "org.gnome.desktop.screensaver";
const GSETTINGS_TIMEOUT: Duration = Duration::from_secs(3);
const REFRESH_SCRIPT: &str = "Main.layoutManager._updateBackgrounds()";

#[derive(Debug, Clone)]
struct Original {
    uri: String,
    dark_uri: Option<String>,
    options: String,
    screensaver_uri: Option<String>,
}

/// GNOME background keys, driven through the `gsettings` tool.
pub struct GsettingsBackground {
    shell: Option<Rc<GnomeShell>>,
    original: Option<Original>,
    has_dark: bool,
}

impl GsettingsBackground {
    pub fn new(shell: Option<Rc<GnomeShell>>) -> Self {
        Self {
            shell,
            original: None,
            has_dark: false,
        }
    }

    fn refresh(&self) {
        if let Some(ref shell) = self.shell
            && let Err(e) = shell.eval(REFRESH_SCRIPT)
        {
            log::debug!("Background refresh skipped: {}", e);
        }
    }
}

fn get(schema: &str, key: &str) -> Result<String> {
    let out = crate::process::stdout_of(
        Command::new("gsettings").args(["get", schema, key]),
        GSETTINGS_TIMEOUT,
    )?;
    Ok(out.trim().to_string())
}

/// `value` is GVariant text, e.g. `'zoom'`.
fn set(schema: &str, key: &str, value: &str) -> Result<()> {
    crate::process::stdout_of(
        Command::new("gsettings").args(["set", schema, key, value]),
        GSETTINGS_TIMEOUT,
    )?;
    Ok(())
}

fn has_key(schema: &str, key: &str) -> bool {
    crate::process::stdout_of(
        Command::new("gsettings").args(["list-keys", schema]),
        GSETTINGS_TIMEOUT,
    )
    .map(|keys| keys.lines().any(|line| line.trim() == key))
    .unwrap_or(false)
}

/// Quote `s` as a GVariant string literal.
fn gvariant_string(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

fn file_uri(path: &Path) -> String {
    gvariant_string(&format!("file://{}", path.display()))
}

impl BackgroundSetter for GsettingsBackground {
    fn save_original(&mut self) -> Result<()> {
        if self.original.is_some() {
            return Ok(());
        }
        self.has_dark = has_key(BACKGROUND_SCHEMA, "picture-uri-dark");
        let original = Original {
            uri: get(BACKGROUND_SCHEMA, "picture-uri")?,
            dark_uri: if self.has_dark {
                get(BACKGROUND_SCHEMA, "picture-uri-dark").ok()
            } else {
                None
            },
            options: get(BACKGROUND_SCHEMA, "picture-options")?,
            screensaver_uri: get(SCREENSAVER_SCHEMA, "picture-uri").ok(),
        };
        log::debug!("Saved original background {}", original.uri);
        self.original = Some(original);
        set(BACKGROUND_SCHEMA, "picture-options", "'zoom'")
    }

    fn publish(&mut self, image: &Path) -> Result<()> {
        let uri = file_uri(image);
        set(BACKGROUND_SCHEMA, "picture-uri", &uri)?;
        if self.has_dark {
            set(BACKGROUND_SCHEMA, "picture-uri-dark", &uri)?;
        }
        if let Err(e) = set(SCREENSAVER_SCHEMA, "picture-uri", &uri) {
            log::debug!("Lock screen background not updated: {}", e);
        }
        self.refresh();
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        let Some(original) = self.original.take() else {
            return Ok(());
        };
        set(BACKGROUND_SCHEMA, "picture-uri", &original.uri)?;
        if let Some(ref dark) = original.dark_uri {
            set(BACKGROUND_SCHEMA, "picture-uri-dark", dark)?;
        }
        set(BACKGROUND_SCHEMA, "picture-options", &original.options)?;
        if let Some(ref uri) = original.screensaver_uri {
            set(SCREENSAVER_SCHEMA, "picture-uri", uri)?;
        }
        self.refresh();
        Ok(())
    }
}
