//! `Manifest.plist` / `Info.plist` decoding.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::diagnostics::Diagnostic;
use crate::error::{Error, ErrorKind, Result};
use crate::plist::{is_binary_plist, is_xml_plist, PlistDocument, PlistValue};
use crate::progress::Stage;
use crate::time;

/// Backup-level property list
pub const MANIFEST_PLIST: &str = "Manifest.plist";

/// Device property list
pub const INFO_PLIST: &str = "Info.plist";

/// Facts about an iOS backup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupProperties {
    /// `IsEncrypted` from `Manifest.plist`; `None` when unknown
    pub is_encrypted: Option<bool>,
    /// Device name
    pub device_name: Option<String>,
    /// iOS version
    pub product_version: Option<String>,
    /// When the backup was taken
    pub last_backup: Option<DateTime<Utc>>,
}

/// Read `Manifest.plist` and `Info.plist` from a backup directory
///
/// Missing files leave fields unset. XML plists are skipped with a warning.
/// A binary plist that fails to decode is `CorruptPlist` and fails the
/// source.
pub fn read_backup_properties(
    backup_root: &Path,
    source: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<BackupProperties> {
    let mut props = BackupProperties::default();

    if let Some(doc) = load(&backup_root.join(MANIFEST_PLIST), source, diagnostics)? {
        props.is_encrypted = doc.root_get("IsEncrypted")?.and_then(PlistValue::as_bool);
        if let Some(lockdown) = doc.dict_get(doc.root_index(), "Lockdown")? {
            props.device_name = string_field(&doc, lockdown, "DeviceName")?;
            props.product_version = string_field(&doc, lockdown, "ProductVersion")?;
        }
    }

    if let Some(doc) = load(&backup_root.join(INFO_PLIST), source, diagnostics)? {
        let root = doc.root_index();
        if let Some(name) = string_field(&doc, root, "Device Name")? {
            props.device_name = Some(name);
        }
        if let Some(version) = string_field(&doc, root, "Product Version")? {
            props.product_version = Some(version);
        }
        props.last_backup = match doc.root_get("Last Backup Date")? {
            Some(PlistValue::Date(seconds)) => time::from_apple(*seconds),
            _ => None,
        };
    }

    tracing::info!(
        encrypted = ?props.is_encrypted,
        version = props.product_version.as_deref().unwrap_or("unknown"),
        "Read backup properties"
    );
    Ok(props)
}

fn load(path: &Path, source: &str, diagnostics: &mut Vec<Diagnostic>) -> Result<Option<PlistDocument>> {
    if !path.is_file() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if is_binary_plist(&data) {
        return PlistDocument::parse(data).map(Some);
    }
    if is_xml_plist(&data) {
        diagnostics.push(Diagnostic::warning(
            source,
            Stage::Manifest,
            ErrorKind::CorruptPlist,
            format!("{} is an XML property list; skipped", name),
        ));
        return Ok(None);
    }
    Err(Error::CorruptPlist(format!("{} is not a property list", name)))
}

fn string_field(doc: &PlistDocument, dict: usize, key: &str) -> Result<Option<String>> {
    match doc.dict_get(dict, key)? {
        Some(index) => Ok(doc.string_at(index)?.map(str::to_string)),
        None => Ok(None),
    }
}
