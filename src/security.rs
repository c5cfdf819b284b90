#![forbid(unsafe_code)]

//! Helpers for handling token material safely on disk and in logs.

use std::io;
use std::path::Path;

/// Limits a file to owner read/write. Token files grant full account access,
/// so they must not be world-readable.
#[cfg(unix)]
pub fn restrict_to_owner(path: &Path) -> io::Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
pub fn restrict_to_owner(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Shortens a secret for log output, keeping only a recognizable prefix.
pub fn redact(secret: &str) -> String {
    const VISIBLE: usize = 6;
    if secret.chars().count() <= VISIBLE {
        return "***".to_string();
    }
    let prefix: String = secret.chars().take(VISIBLE).collect();
    format!("{prefix}***")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_keeps_short_prefix() {
        assert_eq!(redact("ya29.a0AfH6SMBx"), "ya29.a***");
    }

    #[test]
    fn redact_hides_short_secrets_entirely() {
        assert_eq!(redact("abc"), "***");
        assert_eq!(redact(""), "***");
    }

    #[cfg(unix)]
    #[test]
    fn restrict_to_owner_sets_0600() {
        use std::os::unix::fs::PermissionsExt;

        let file = tempfile::NamedTempFile::new().unwrap();
        restrict_to_owner(file.path()).unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
