//! Conflict-copy naming for keep-both resolution
//!
//! Copies are named `name (conflicted copy YYYY-MM-DD xxxxxxxx).ext`, where
//! the eight hex characters come from a fresh UUID. The extension is the part
//! after the last dot; a leading dot (hidden file) is not an extension.

use chrono::{NaiveDate, Utc};
use oxisync_core::domain::path;
use uuid::Uuid;

/// Generates names for conflict copies
pub struct ConflictNamer;

impl ConflictNamer {
    /// Name of a conflict copy of `original_name`, dated today.
    pub fn generate(original_name: &str) -> String {
        let tag = Uuid::new_v4().simple().to_string();
        Self::generate_with(original_name, Utc::now().date_naive(), &tag[..8])
    }

    /// Name of a conflict copy with an explicit date and tag.
    pub fn generate_with(original_name: &str, date: NaiveDate, tag: &str) -> String {
        let (stem, ext) = split_extension(original_name);
        format!("{stem} (conflicted copy {} {tag}){ext}", date.format("%Y-%m-%d"))
    }

    /// A copy name that `taken` reports as free.
    ///
    /// Falls back to a numbered suffix, then to a full UUID, when the
    /// generated names collide.
    pub fn generate_unique<F>(original_name: &str, mut taken: F) -> String
    where
        F: FnMut(&str) -> bool,
    {
        let candidate = Self::generate(original_name);
        if !taken(&candidate) {
            return candidate;
        }

        let (stem, ext) = split_extension(&candidate);
        for i in 2..=99 {
            let numbered = format!("{stem} {i}{ext}");
            if !taken(&numbered) {
                return numbered;
            }
        }

        format!("{original_name}.conflict-{}", Uuid::new_v4())
    }

    /// Relative path of a conflict copy placed next to `original_path`.
    pub fn copy_path<F>(original_path: &str, mut taken: F) -> String
    where
        F: FnMut(&str) -> bool,
    {
        let parent = path::parent(original_path).unwrap_or("");
        let name = Self::generate_unique(path::file_name(original_path), |candidate| {
            taken(&path::join(parent, candidate))
        });
        path::join(parent, &name)
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}
