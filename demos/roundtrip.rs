//! Example of packing and unpacking an archive in memory

use std::path::{Path, PathBuf};

use tarsau::{classify_bytes, Decoder, Encoder, MemoryBackend, Verdict};

fn main() -> anyhow::Result<()> {
    println!("=== tarsau Archive Example ===\n");

    let mut files = MemoryBackend::new();
    files.insert("src/README.md", 0o644, "# Example Archive\n\nThis is a sample file.\n");
    files.insert("src/build.sh", 0o755, "echo building\n");

    // Digits count against a file, so a leading digit is an instant reject.
    for sample in [&b"plain words"[..], &b"2024-01-01"[..], &[0xFFu8, 0xD8, 0xFF, 0xE0][..]] {
        match classify_bytes(sample) {
            Verdict::Accept { size } => println!("accept  {:?} ({} bytes)", String::from_utf8_lossy(sample), size),
            Verdict::Reject { offset, ratio } => {
                println!("reject  {:?} at byte {} ({:.1}%)", String::from_utf8_lossy(sample), offset, ratio)
            }
        }
    }

    let inputs = vec![PathBuf::from("src/README.md"), PathBuf::from("src/build.sh")];
    let encoded = Encoder::new().encode_to_vec(&files, &inputs)?;

    let boundary = encoded.iter().rposition(|&b| b == b'|').map_or(0, |i| i + 1);
    println!("\nHeader: {}", String::from_utf8_lossy(&encoded[..boundary]));
    println!("Payload: {} bit characters", encoded.len() - boundary);

    let mut out = MemoryBackend::new();
    let summary = Decoder::new().extract(&encoded, &mut out, Path::new("out"))?;

    println!("\nDecoded {} files:", summary.files.len());
    for (path, file) in out.files() {
        println!("  - {} ({} bytes, mode {:o})", path.display(), file.data.len(), file.mode);
    }

    for input in &inputs {
        let name = input.file_name().unwrap_or_default();
        let restored = out.get(Path::new("out").join(name));
        assert_eq!(restored, files.get(input));
    }

    println!("\nRound-trip verification passed!");

    Ok(())
}
