//! Chrome profile preferences for silent "Save as PDF" printing.
//!
//! With `--kiosk-printing` Chrome skips the print dialog and uses the sticky
//! print-preview settings stored in the profile. Pointing those at the
//! "Save as PDF" destination and the save directory at the staging folder
//! makes `window.print()` drop a PDF there without user interaction.

use std::path::Path;

use serde_json::{Map, Value, json};
use tracing::debug;

use super::BrowserError;

/// Print destination id Chrome uses for PDF output.
pub const SAVE_AS_PDF: &str = "Save as PDF";

/// Sets print and download preferences in a parsed `Preferences` document.
///
/// Other keys are preserved. A document that is not a JSON object is
/// replaced by one.
pub fn apply_print_preferences(prefs: &mut Value, download_dir: &Path) {
    if !prefs.is_object() {
        *prefs = Value::Object(Map::new());
    }

    let app_state = json!({
        "recentDestinations": [
            {"id": SAVE_AS_PDF, "origin": "local", "account": ""}
        ],
        "selectedDestinationId": SAVE_AS_PDF,
        "version": 2,
        "isLandscapeEnabled": true,
        "isHeaderFooterEnabled": false
    });
    let dir = Value::String(download_dir.display().to_string());

    // Chrome stores appState as a JSON string, not a nested object.
    set_path(
        prefs,
        &["printing", "print_preview_sticky_settings", "appState"],
        Value::String(app_state.to_string()),
    );
    set_path(prefs, &["savefile", "default_directory"], dir.clone());
    set_path(prefs, &["download", "default_directory"], dir);
    set_path(prefs, &["download", "prompt_for_download"], Value::Bool(false));
}

/// Reads, patches and rewrites `<profile_dir>/Preferences`.
///
/// # Errors
///
/// Returns [`BrowserError::Profile`] on IO failures and
/// [`BrowserError::Preferences`] if an existing file is not valid JSON.
pub async fn write_print_preferences(
    profile_dir: &Path,
    download_dir: &Path,
) -> Result<(), BrowserError> {
    let file = profile_dir.join("Preferences");

    tokio::fs::create_dir_all(profile_dir)
        .await
        .map_err(|source| BrowserError::Profile {
            path: profile_dir.to_path_buf(),
            source,
        })?;

    let mut prefs = match tokio::fs::read(&file).await {
        Ok(bytes) if bytes.is_empty() => Value::Object(Map::new()),
        Ok(bytes) => {
            serde_json::from_slice(&bytes).map_err(|e| BrowserError::Preferences {
                path: file.clone(),
                message: e.to_string(),
            })?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Map::new()),
        Err(source) => return Err(BrowserError::Profile { path: file, source }),
    };

    apply_print_preferences(&mut prefs, download_dir);

    let bytes = serde_json::to_vec(&prefs).map_err(|e| BrowserError::Preferences {
        path: file.clone(),
        message: e.to_string(),
    })?;
    tokio::fs::write(&file, bytes)
        .await
        .map_err(|source| BrowserError::Profile {
            path: file.clone(),
            source,
        })?;

    debug!(path = %file.display(), "print preferences written");
    Ok(())
}

fn set_path(root: &mut Value, keys: &[&str], value: Value) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };

    let mut current = root;
    for key in parents {
        let Value::Object(map) = current else {
            return;
        };
        let entry = map
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry;
    }

    if let Value::Object(map) = current {
        map.insert((*last).to_string(), value);
    }
}
