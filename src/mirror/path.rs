//! Title sanitization and sibling collision resolution for local paths.
//!
//! Every page maps to a base path `P/X` from which three names derive:
//! `P/X.pdf`, `P/X.attachments/` and `P/X/` (children). The mapping is a pure
//! function of the page's title, its ancestors' segments, and the `(id, title)`
//! set of its siblings, so re-running against an unchanged space lands every
//! file in the same place regardless of visit order.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;

/// Maximum byte length of a sanitized segment, leaving room for suffixes
/// and the `.attachments` extension under the common 255-byte name limit.
pub const MAX_SEGMENT_BYTES: usize = 200;

/// Extension appended to a page segment to name its attachment directory.
pub const ATTACHMENTS_EXTENSION: &str = ".attachments";

/// Extension of exported page files.
pub const PDF_EXTENSION: &str = ".pdf";

/// Sanitizes a remote title into a single path segment.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |`) and control characters with `_`, strips trailing
/// dots and spaces, and caps the length at [`MAX_SEGMENT_BYTES`]. Titles that
/// end up empty, `.` or `..` become `_`.
///
/// # Examples
///
/// ```
/// use space_export_core::mirror::path::sanitize_title;
///
/// assert_eq!(sanitize_title("Q3/Q4 plan: draft?"), "Q3_Q4 plan_ draft_");
/// assert_eq!(sanitize_title(".."), "_");
/// ```
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let capped = truncate_to_boundary(trim_trailing(&replaced), MAX_SEGMENT_BYTES);
    let trimmed = trim_trailing(capped);

    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Joins sanitized ancestor titles and the page title into a relative base path.
///
/// This is the collision-free case; siblings sharing a title are separated
/// by [`SiblingScope::assign`] before segments are joined.
#[must_use]
pub fn map_path<S: AsRef<str>>(ancestor_titles: &[S], title: &str) -> PathBuf {
    let mut path: PathBuf = ancestor_titles
        .iter()
        .map(|t| sanitize_title(t.as_ref()))
        .collect();
    path.push(sanitize_title(title));
    path
}

/// File name of a page's PDF export (`X.pdf`).
///
/// Built by appending rather than `Path::with_extension`, since titles
/// routinely contain dots (`v1.2 Release Notes`).
#[must_use]
pub fn pdf_file_name(segment: &str) -> String {
    format!("{segment}{PDF_EXTENSION}")
}

/// Directory name holding a page's attachments (`X.attachments`).
#[must_use]
pub fn attachments_dir_name(segment: &str) -> String {
    format!("{segment}{ATTACHMENTS_EXTENSION}")
}

/// Hidden temp name an attachment streams into before the final rename.
#[must_use]
pub fn temp_file_name(name: &str) -> String {
    format!(".{name}.part")
}

/// What kind of sibling set a scope resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    /// Child pages of one parent: each segment occupies `X`, `X.pdf` and
    /// `X.attachments`.
    Pages,
    /// Attachments of one page: each name occupies itself and its temp file.
    Files,
}

/// Collision resolution for one set of siblings.
///
/// Keys are compared case-insensitively so the layout is valid on
/// case-insensitive filesystems. Among entries that want the same name, the
/// one with the lowest id (numeric-aware) keeps the bare name and the rest get
/// `-2`, `-3`, ... (for files, before the extension: `pic1-2.png`). Names a
/// bare title claims are never handed out as suffixed variants, so a page
/// literally titled `A-2` keeps its name even next to two pages titled `A`.
#[derive(Debug, Clone)]
pub struct SiblingScope {
    kind: ScopeKind,
    reserved: HashSet<String>,
}

impl SiblingScope {
    /// Scope for the child pages of one parent (or the space roots).
    #[must_use]
    pub fn pages() -> Self {
        Self {
            kind: ScopeKind::Pages,
            reserved: HashSet::new(),
        }
    }

    /// Scope for the attachments of one page.
    #[must_use]
    pub fn files() -> Self {
        Self {
            kind: ScopeKind::Files,
            reserved: HashSet::new(),
        }
    }

    /// Marks a name as unavailable (e.g. the staging directory at the root).
    #[must_use]
    pub fn with_reserved(mut self, name: &str) -> Self {
        self.reserved.insert(name.to_lowercase());
        self
    }

    /// Assigns a unique segment to every `(id, title)` entry.
    ///
    /// The result is in input order and depends only on the entry set, not
    /// on its order.
    #[must_use]
    pub fn assign(&self, entries: &[(&str, &str)]) -> Vec<String> {
        let sanitized: Vec<String> = entries
            .iter()
            .map(|(_, title)| sanitize_title(title))
            .collect();

        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by(|&a, &b| {
            compare_ids(entries[a].0, entries[b].0)
                .then_with(|| sanitized[a].cmp(&sanitized[b]))
                .then_with(|| a.cmp(&b))
        });

        let mut taken = self.reserved.clone();
        let mut assigned: Vec<Option<String>> = vec![None; entries.len()];

        // Bare names first, so a suffixed variant never steals a real title.
        let mut deferred = Vec::new();
        for &index in &order {
            let candidate = &sanitized[index];
            if self.try_claim(&mut taken, candidate) {
                assigned[index] = Some(candidate.clone());
            } else {
                deferred.push(index);
            }
        }

        for index in deferred {
            let base = &sanitized[index];
            let mut n = 2usize;
            loop {
                let candidate = self.suffixed(base, n);
                if self.try_claim(&mut taken, &candidate) {
                    assigned[index] = Some(candidate);
                    break;
                }
                n += 1;
            }
        }

        assigned
            .into_iter()
            .zip(sanitized)
            .map(|(name, fallback)| name.unwrap_or(fallback))
            .collect()
    }

    fn occupied(&self, name: &str) -> Vec<String> {
        let key = name.to_lowercase();
        match self.kind {
            ScopeKind::Pages => vec![pdf_file_name(&key), attachments_dir_name(&key), key],
            ScopeKind::Files => vec![temp_file_name(&key), key],
        }
    }

    fn try_claim(&self, taken: &mut HashSet<String>, name: &str) -> bool {
        let occupied = self.occupied(name);
        if occupied.iter().any(|n| taken.contains(n)) {
            return false;
        }
        taken.extend(occupied);
        true
    }

    fn suffixed(&self, base: &str, n: usize) -> String {
        match self.kind {
            ScopeKind::Pages => format!("{base}-{n}"),
            ScopeKind::Files => match split_extension(base) {
                (stem, Some(ext)) => format!("{stem}-{n}.{ext}"),
                (stem, None) => format!("{stem}-{n}"),
            },
        }
    }
}

/// Orders page ids numerically when both are integers, lexically otherwise.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Splits `name.ext` at the last dot. Leading-dot names have no extension.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => (&name[..pos], Some(&name[pos + 1..])),
        _ => (name, None),
    }
}

fn trim_trailing(value: &str) -> &str {
    value.trim_end_matches(['.', ' '])
}

fn truncate_to_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
