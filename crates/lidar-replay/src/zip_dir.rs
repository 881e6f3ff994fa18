// modified from https://github.com/mvdnes/zip-rs/blob/master/examples/write_dir.rs

use std::io::{Seek, Write};
use std::iter::Iterator;
use zip::{result::ZipResult, write::FileOptions, ZipWriter};

use std::fs::File;
use std::path::Path;

fn zip_dir<T, P>(
    it: &mut dyn Iterator<Item = walkdir::DirEntry>,
    prefix: P,
    zipw: &mut ZipWriter<T>,
    options: FileOptions,
) -> ZipResult<()>
where
    T: Write + Seek,
    P: AsRef<Path>,
{
    for entry in it {
        let path = entry.path();
        let name = path.strip_prefix(prefix.as_ref()).unwrap();

        // Join path components with forward slash ("/") because this is how zip
        // files stores them. This is important because on Windows path
        // components are separated with back slash ("\").
        let name_string = name
            .components()
            .map(|c| c.as_os_str().to_str().unwrap())
            .collect::<Vec<&str>>()
            .join("/");

        if path.is_file() {
            zipw.start_file(name_string, options)?;
            let mut f = File::open(path)?;
            std::io::copy(&mut f, zipw)?;
        } else if !name_string.is_empty() {
            zipw.add_directory(name_string, options)?;
        }
    }
    Result::Ok(())
}

/// Zips every file under `src_dir` into `dest_zip_path`, paths relative to
/// `src_dir`, stored uncompressed (frame chunks are already compact binary,
/// not worth spending CPU re-compressing).
pub(crate) fn zip_directory(src_dir: &Path, dest_zip_path: &Path) -> lidar_types::Result<()> {
    let file = File::create(dest_zip_path)?;
    let mut zipw = ZipWriter::new(file);

    let options = FileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .large_file(true)
        .unix_permissions(0o644);

    let walkdir = walkdir::WalkDir::new(src_dir);
    let mut entries = walkdir.into_iter().filter_map(|e| e.ok());
    zip_dir(&mut entries, src_dir, &mut zipw, options)?;
    zipw.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zips_nested_directory_contents() {
        let output_root = tempfile::tempdir().unwrap();
        let file1 = output_root.path().join("file1.txt");
        std::fs::write(file1, "file 1 contents").unwrap();
        let subdir1 = output_root.path().join("subdir1");
        std::fs::create_dir_all(&subdir1).unwrap();
        let file2 = subdir1.join("file2.txt");
        std::fs::write(file2, "file 2 contents").unwrap();

        let dest = output_root.path().with_extension("ziptest");
        zip_directory(output_root.path(), &dest).unwrap();

        let archive_file = File::open(&dest).unwrap();
        let mut archive = zip::ZipArchive::new(archive_file).unwrap();
        let mut fnames: std::collections::BTreeSet<String> =
            archive.file_names().map(|s| s.to_string()).collect();
        assert!(fnames.remove("file1.txt"));
        assert!(fnames.remove("subdir1/"));
        assert!(fnames.remove("subdir1/file2.txt"));
        assert_eq!(fnames.len(), 0);
    }
}
