use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

pub const CPF_TEXT: &[u8] = b"Cadastro de cliente\nCPF: 123.456.789-09\n";

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    for (name, content) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap();
}

/// Two megabytes of zeros; deflate squeezes them far past a 100:1 ratio.
pub fn zeros() -> Vec<u8> {
    vec![0u8; 2 * 1024 * 1024]
}
