//! Zip packaging of stamped documents

use crate::StampError;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Pack `(filename, bytes)` entries into one zip archive
///
/// Entries keep their original filenames, optionally under `folder`. Only
/// the last path segment of a filename is used. Every entry is written: when
/// a name is already taken, the later entry gets a numbered name
/// (`P-001 (2).pdf`).
pub fn build_archive(
    entries: &[(&str, &[u8])],
    folder: Option<&str>,
) -> Result<Vec<u8>, StampError> {
    let prefix = folder
        .map(|f| f.trim().trim_matches('/'))
        .filter(|f| !f.is_empty());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut seen = HashSet::new();

    for (filename, bytes) in entries {
        let base = base_name(filename);
        let name = unique_name(&seen, prefix, base);
        if name.rsplit('/').next() != Some(base) {
            log::warn!("duplicate archive entry {:?} stored as {:?}", base, name);
        }
        seen.insert(name.clone());

        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes)?;
    }

    let cursor = zip.finish()?;
    log::info!("archive: {} entries", seen.len());
    Ok(cursor.into_inner())
}

fn entry_name(prefix: Option<&str>, base: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}/{base}"),
        None => base.to_string(),
    }
}

/// `base` under `prefix`, numbered from 2 when the plain name is taken
fn unique_name(seen: &HashSet<String>, prefix: Option<&str>, base: &str) -> String {
    let name = entry_name(prefix, base);
    if !seen.contains(&name) {
        return name;
    }

    let (stem, ext) = match base.rfind('.') {
        Some(dot) if dot > 0 => base.split_at(dot),
        _ => (base, ""),
    };
    (2..)
        .map(|n| entry_name(prefix, &format!("{stem} ({n}){ext}")))
        .find(|candidate| !seen.contains(candidate))
        .unwrap_or(name)
}

fn base_name(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn entry_names(bytes: Vec<u8>) -> Vec<String> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_entries_under_folder() {
        let bytes = build_archive(
            &[("A1.pdf", b"%PDF-a".as_slice()), ("B2.pdf", b"%PDF-b".as_slice())],
            Some("editados/"),
        )
        .unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_name("editados/B2.pdf")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "%PDF-b");
    }

    #[test]
    fn test_entries_at_root() {
        let bytes = build_archive(&[("A1.pdf", b"x".as_slice())], None).unwrap();
        assert_eq!(entry_names(bytes), vec!["A1.pdf"]);

        let bytes = build_archive(&[("A1.pdf", b"x".as_slice())], Some("  ")).unwrap();
        assert_eq!(entry_names(bytes), vec!["A1.pdf"]);
    }

    #[test]
    fn test_duplicates_and_paths() {
        let bytes = build_archive(
            &[
                ("in/A1.pdf", b"first".as_slice()),
                ("other\\A1.pdf", b"second".as_slice()),
                ("C3.pdf", b"third".as_slice()),
                ("A1.pdf", b"fourth".as_slice()),
            ],
            Some("out"),
        )
        .unwrap();
        assert_eq!(
            entry_names(bytes.clone()),
            vec!["out/A1.pdf", "out/A1 (2).pdf", "out/C3.pdf", "out/A1 (3).pdf"]
        );

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut content = String::new();
        archive
            .by_name("out/A1 (2).pdf")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn test_numbered_name_already_taken() {
        let bytes = build_archive(
            &[
                ("A1 (2).pdf", b"a".as_slice()),
                ("A1.pdf", b"b".as_slice()),
                ("x/A1.pdf", b"c".as_slice()),
                ("README", b"d".as_slice()),
                ("y/README", b"e".as_slice()),
            ],
            None,
        )
        .unwrap();
        assert_eq!(
            entry_names(bytes),
            vec!["A1 (2).pdf", "A1.pdf", "A1 (3).pdf", "README", "README (2)"]
        );
    }

    #[test]
    fn test_empty_archive() {
        let bytes = build_archive(&[], Some("editados")).unwrap();
        assert!(entry_names(bytes).is_empty());
    }
}
